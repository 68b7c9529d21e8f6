use clap::Parser;
use tracing_subscriber::EnvFilter;

use rerobot_runtime::config::{ARM_BAUD, ARM_PORT, BASE_BAUD, BASE_PORT};
use rerobot_runtime::runtime::{self, RuntimeOptions};

/// Drive the Pioneer base and the LSS drawing arm over Zenoh
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Serial port of the base controller
    #[arg(long, default_value = BASE_PORT)]
    base_port: String,

    #[arg(long, default_value_t = BASE_BAUD)]
    base_baud: u32,

    /// Serial port of the arm servo bus
    #[arg(long, default_value = ARM_PORT)]
    arm_port: String,

    #[arg(long, default_value_t = ARM_BAUD)]
    arm_baud: u32,

    /// Run without the base
    #[arg(long)]
    no_base: bool,

    /// Run without the arm
    #[arg(long)]
    no_arm: bool,

    /// Confirm arm arrival after every move
    #[arg(long)]
    checking: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let args = Args::parse();
    let options = RuntimeOptions {
        base_port: (!args.no_base).then_some(args.base_port),
        base_baud: args.base_baud,
        arm_port: (!args.no_arm).then_some(args.arm_port),
        arm_baud: args.arm_baud,
        checking: args.checking,
    };

    if let Err(e) = runtime::run(options).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
