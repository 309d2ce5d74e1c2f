mod demo;

use anyhow::{Context, anyhow};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::{env, fs, fs::OpenOptions};

use meshcrypt_config::MeshCryptConfig;
use meshcrypt_privacy::stealth::{self, StealthKeypair, StealthPayment};
use meshcrypt_privacy::{SpendingKey, WalletSettings, decode_address, generate_mnemonic};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const KEY_DIR_NAME: &str = ".meshcrypt";
const DEFAULT_KEY_FILE: &str = "spending.key";

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let cmd = &args[1];

    let result = match cmd.as_str() {
        "genkey" => genkey(&parse_new_key_args(&args[2..])),
        "restore" => restore(&parse_new_key_args(&args[2..])),
        "address" => {
            let opts = parse_key_args(&args[2..]);
            address(&opts)
        }
        "viewkey" => {
            let opts = parse_key_args(&args[2..]);
            viewkey(&opts)
        }
        "decode" => match args.get(2) {
            Some(encoded) => decode(encoded),
            None => {
                println!("Usage: decode <address>");
                return;
            }
        },
        "stealth" => stealth_roundtrip(),
        "demo" => demo::run(&settings()),
        "config" => {
            print!("{}", MeshCryptConfig::generate_sample());
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        _ => {
            println!("❌ Unknown command: {}", cmd);
            println!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("MeshCrypt CLI - Shielded Wallet Tool");
    println!();
    println!("USAGE:");
    println!("  meshcrypt <command> [args]");
    println!();
    println!("KEY COMMANDS:");
    println!("  genkey [filename] [--mnemonic] Generate a new spending key");
    println!("  restore [filename] [--account n]");
    println!("                                 Restore a key from a recovery phrase on stdin");
    println!("  address [index] [--key file]   Show the diversified address at index");
    println!("  viewkey [--key file]           Export the viewing key as hex");
    println!();
    println!("OTHER COMMANDS:");
    println!("  decode <address>               Show network and parts of an address");
    println!("  stealth                        Derive and detect a one-time stealth address");
    println!("  demo                           Run a two-wallet shielded transfer");
    println!("  config                         Print a sample config.toml");
    println!("  help                           Show this help message");
    println!();
    println!("EXAMPLES:");
    println!("  meshcrypt genkey                     # Write ~/.meshcrypt/spending.key");
    println!("  meshcrypt genkey --mnemonic          # Same, backed by a 24-word phrase");
    println!("  echo \"$PHRASE\" | meshcrypt restore   # Recreate the key from the phrase");
    println!("  meshcrypt address 3                  # Address at diversifier index 3");
    println!("  meshcrypt decode zt1...              # Inspect an address");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("  MC_CONFIG            Path to config.toml");
    println!("  MC_NETWORK           mainnet / testnet / regtest");
    println!("  RUST_LOG             Log level (debug/info/warn/error)");
}

/// Options shared by commands that read a spending key
#[derive(Debug, Default)]
struct KeyArgs {
    index: u32,
    key_file: Option<PathBuf>,
}

fn parse_key_args(args: &[String]) -> KeyArgs {
    let mut opts = KeyArgs::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--key" | "-k" => {
                if let Some(path) = args.get(i + 1) {
                    opts.key_file = Some(PathBuf::from(path));
                    i += 1;
                }
            }
            other => {
                if let Ok(index) = other.parse() {
                    opts.index = index;
                }
            }
        }
        i += 1;
    }

    opts
}

/// Options of commands that write a new key file
#[derive(Debug, Default)]
struct NewKeyArgs {
    filename: Option<String>,
    mnemonic: bool,
    account: u32,
}

fn parse_new_key_args(args: &[String]) -> NewKeyArgs {
    let mut opts = NewKeyArgs::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--mnemonic" | "-m" => opts.mnemonic = true,
            "--account" | "-a" => {
                if let Some(account) = args.get(i + 1).and_then(|a| a.parse().ok()) {
                    opts.account = account;
                    i += 1;
                }
            }
            other => opts.filename = Some(other.to_string()),
        }
        i += 1;
    }

    opts
}

fn settings() -> WalletSettings {
    match WalletSettings::try_from(MeshCryptConfig::global()) {
        Ok(settings) => settings,
        Err(e) => {
            log::warn!("Invalid config ({e}), using defaults");
            WalletSettings::default()
        }
    }
}

fn key_dir() -> anyhow::Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(KEY_DIR_NAME))
        .ok_or_else(|| anyhow!("Could not determine home directory"))
}

fn load_key(path: Option<&PathBuf>) -> anyhow::Result<SpendingKey> {
    let path = match path {
        Some(path) => path.clone(),
        None => key_dir()?.join(DEFAULT_KEY_FILE),
    };

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read key file: {}", path.display()))?;
    let bytes = hex::decode(contents.trim())
        .with_context(|| format!("Key file is not hex: {}", path.display()))?;
    SpendingKey::from_slice(&bytes)
        .with_context(|| format!("Invalid spending key in {}", path.display()))
}

fn genkey(opts: &NewKeyArgs) -> anyhow::Result<()> {
    let mut rng = rand::rngs::OsRng;
    println!("🔐 Generating new spending key...");

    let key = if opts.mnemonic {
        let phrase = generate_mnemonic(&mut rng)?;
        let key = SpendingKey::from_mnemonic(&phrase, "", opts.account)?;
        println!("📝 Recovery phrase (write it down, it is shown once):");
        println!();
        println!("   {phrase}");
        println!();
        key
    } else {
        SpendingKey::random(&mut rng)
    };

    write_key_file(opts.filename.as_deref(), &key)
}

fn restore(opts: &NewKeyArgs) -> anyhow::Result<()> {
    eprintln!("Enter recovery phrase:");
    let mut phrase = String::new();
    io::stdin()
        .lock()
        .read_line(&mut phrase)
        .context("Failed to read recovery phrase")?;

    let key = SpendingKey::from_mnemonic(phrase.trim(), "", opts.account)
        .context("Could not restore from recovery phrase")?;
    println!("🔑 Restored account {} spending key", opts.account);
    write_key_file(opts.filename.as_deref(), &key)
}

fn write_key_file(filename: Option<&str>, key: &SpendingKey) -> anyhow::Result<()> {
    let dir = key_dir()?;
    let key_path = dir.join(filename.unwrap_or(DEFAULT_KEY_FILE));

    // Create directory if it doesn't exist
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
        println!("📁 Created directory: {}", dir.display());

        #[cfg(unix)]
        {
            // Set directory permissions to 700 (rwx------)
            let mut perms = fs::metadata(&dir)?.permissions();
            perms.set_mode(0o700);
            fs::set_permissions(&dir, perms)?;
        }
    }

    if key_path.exists() {
        return Err(anyhow!(
            "File {} already exists. Remove it first or use a different filename.",
            key_path.display()
        ));
    }

    let network = settings().network;
    let address = key.viewing_key()?.address(0).encode(network);

    let mut f = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&key_path)
        .with_context(|| format!("Failed to create {}", key_path.display()))?;

    #[cfg(unix)]
    {
        // chmod 600 (rw-------)
        let mut perms = f.metadata()?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&key_path, perms)?;
    }

    f.write_all(hex::encode(key.as_bytes()).as_bytes())?;

    println!("✅ Wrote spending key to {}", key_path.display());
    println!("📬 Default address ({network}): {address}");

    Ok(())
}

fn address(opts: &KeyArgs) -> anyhow::Result<()> {
    let key = load_key(opts.key_file.as_ref())?;
    let network = settings().network;
    let address = key.viewing_key()?.address(opts.index);
    println!("{}", address.encode(network));
    Ok(())
}

fn viewkey(opts: &KeyArgs) -> anyhow::Result<()> {
    let key = load_key(opts.key_file.as_ref())?;
    println!("{}", key.viewing_key()?.encode_hex());
    Ok(())
}

fn decode(encoded: &str) -> anyhow::Result<()> {
    let (network, address) =
        decode_address(encoded).with_context(|| format!("Could not decode {encoded}"))?;
    println!("network:     {network}");
    println!("diversifier: {}", hex::encode(address.diversifier().as_bytes()));
    println!("pk_d:        {}", hex::encode(&address.to_bytes()[11..]));
    if network != settings().network {
        println!("⚠️  configured network is {}", settings().network);
    }
    Ok(())
}

fn stealth_roundtrip() -> anyhow::Result<()> {
    let mut rng = rand::rngs::OsRng;
    let recipient = StealthKeypair::generate(&mut rng);
    let payment = StealthPayment::generate(&recipient.public, &mut rng);

    println!("recipient:     {}", hex::encode(recipient.public.to_bytes()));
    println!("stealth addr:  {}", hex::encode(payment.stealth_address.to_bytes()));
    println!("ephemeral pub: {}", hex::encode(payment.ephemeral_public.to_bytes()));

    let found = stealth::scan(
        &payment.ephemeral_public,
        &payment.stealth_address,
        &recipient.private,
        &recipient.public,
    );
    let key = found
        .stealth_private
        .ok_or_else(|| anyhow!("recipient did not detect the stealth payment"))?;
    if key.public_key() != payment.stealth_address {
        return Err(anyhow!("derived stealth key does not match the address"));
    }
    println!("✅ Recipient detected the payment and derived its spending key");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn new_key_args_parse_flags_and_filename() {
        let opts = parse_new_key_args(&args(&["backup.key", "--mnemonic", "--account", "4"]));
        assert_eq!(opts.filename.as_deref(), Some("backup.key"));
        assert!(opts.mnemonic);
        assert_eq!(opts.account, 4);

        let opts = parse_new_key_args(&[]);
        assert!(opts.filename.is_none());
        assert!(!opts.mnemonic);
        assert_eq!(opts.account, 0);
    }
}
