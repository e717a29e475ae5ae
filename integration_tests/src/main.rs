//! Hardware bench tests for the water-level node's LoRaWAN modem.
//!
//! Connect an RN2903 module through a USB-UART bridge and run the firmware's
//! modem driver, join manager and uplink encoder against it.

mod device;

use anyhow::anyhow;
use clap::{Parser, ValueEnum};
use colored::Colorize;

use device::{resolve_port, DeviceClient};
use tests::{print_results, run_all_tests, JoinOptions};
use water_level_rust_firmware::config::{lorawan, modem};
use water_level_rust_firmware::lorawan::{JoinCredentials, Region};

#[derive(Clone, Copy, ValueEnum)]
enum RegionArg {
    Au915,
    Us915,
}

impl From<RegionArg> for Region {
    fn from(region: RegionArg) -> Self {
        match region {
            RegionArg::Au915 => Region::Au915,
            RegionArg::Us915 => Region::Us915,
        }
    }
}

#[derive(Parser)]
#[command(name = "integration-tests")]
#[command(about = "Bench tests for the water-level node's LoRaWAN modem")]
struct Args {
    /// Serial port for the modem (use "auto" to auto-detect)
    #[arg(short, long, default_value = "auto")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value_t = modem::BAUD_RATE)]
    baud: u32,

    /// Channel plan to apply
    #[arg(short, long, value_enum, default_value = "au915")]
    region: RegionArg,

    /// AppEUI as hex (spaces allowed); enables the join and uplink tests
    #[arg(long, requires = "app_key")]
    app_eui: Option<String>,

    /// AppKey as hex (spaces allowed)
    #[arg(long, requires = "app_eui")]
    app_key: Option<String>,

    /// Join status polls before giving up
    #[arg(long, default_value_t = lorawan::MAX_JOIN_ATTEMPT)]
    max_attempts: u32,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let join = match (&args.app_eui, &args.app_key) {
        (Some(eui), Some(key)) => Some(JoinOptions {
            credentials: JoinCredentials::from_config(eui, key)
                .map_err(|e| anyhow!("Invalid credentials: {:?}", e))?,
            max_attempts: args.max_attempts,
        }),
        _ => None,
    };

    // Resolve port (auto-detect if "auto")
    let port = resolve_port(&args.port, args.baud)?;

    println!("{}", "Water-Level Modem Bench Tests".bold());
    println!("Port: {}", port);
    println!("Baud: {}", args.baud);
    if join.is_none() {
        println!("{}", "No credentials given, skipping join and uplink".yellow());
    }
    println!();

    println!("Connecting to modem...");
    let mut device = DeviceClient::new(&port, args.baud)?;
    device.clear_buffer()?;
    println!("{}", "Connected!".green());

    println!("\nRunning tests...\n");

    let results = run_all_tests(&mut device, args.region.into(), join.as_ref());
    print_results(&results);

    // Exit with error code if any tests failed
    let failed = results.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}
