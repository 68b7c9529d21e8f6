// Arm diagnostic: READ-ONLY test to verify the servo bus
//
// This tool only sends queries to the servos, nothing moves.
// Use this first before running the runtime with an arm attached.
//
// Usage: cargo run --example arm_diagnostic -- [port] [baud]
// Example: cargo run --example arm_diagnostic -- /dev/ttyUSB1 115200

use std::io::{self, Write};

use rerobot_runtime::arm::{Joint, JointActuator, JointStatus, LssBus, LssServo};
use rerobot_runtime::config::{ARM_BAUD, ARM_PORT};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let port = args.next().unwrap_or_else(|| ARM_PORT.to_string());
    let baud = match args.next() {
        Some(b) => b.parse()?,
        None => ARM_BAUD,
    };

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            Arm Servo Diagnostic (READ-ONLY)                  ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  This tool only QUERIES the servos - no movement             ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("Serial port: {} @ {} baud", port, baud);
    println!(
        "Expected servo IDs: {:?}",
        Joint::ALL.map(|j| j.servo_id())
    );
    println!();

    // Try to open serial port
    println!("Step 1: Opening serial port...");
    let bus = match LssBus::open(&port, baud) {
        Ok(bus) => {
            println!("  ✓ Serial port opened successfully");
            bus.shared()
        }
        Err(e) => {
            println!("  ✗ Failed to open serial port: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the port path is correct");
            println!("  - Verify the USB cable is connected and the arm is powered");
            println!("  - Check the servos are configured for {} baud", baud);
            return Err(e.into());
        }
    };
    println!();

    // Ask each servo for its status
    println!("Step 2: Querying servo status...");
    let mut servos = Vec::new();
    let mut all_found = true;
    for joint in Joint::ALL {
        let mut servo = LssServo::new(joint.servo_id(), bus.clone());
        print!("  {:?} (ID {}): ", joint, servo.id());
        io::stdout().flush()?;

        match servo.status() {
            Ok(Some(code)) => println!("✓ {:?} ({})", JointStatus::from_code(code), code),
            Ok(None) => {
                println!("✗ NO RESPONSE");
                all_found = false;
            }
            Err(e) => {
                println!("✗ ERROR: {}", e);
                all_found = false;
            }
        }
        servos.push((joint, servo));
    }
    println!();

    if !all_found {
        println!("⚠ WARNING: Not all servos responded!");
        println!("  - Check servo power supply");
        println!("  - Verify servo IDs are 1 to 5");
        println!("  - Check daisy-chain wiring");
        println!();
        print!("Continue reading available servos? [y/N]: ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
        println!();
    }

    println!("Step 3: Reading servo telemetry...");
    println!();
    for (joint, servo) in servos.iter_mut() {
        println!("  === {:?} (ID {}) ===", joint, servo.id());
        match servo.telemetry() {
            Ok(t) => {
                println!("    Position (0.1 deg): {}", show(t.position));
                println!("    Speed (deg/s):      {}", show(t.speed));
                println!("    Current (mA):       {}", show(t.current));
            }
            Err(e) => println!("    ERROR - {}", e),
        }
        println!();
    }

    println!("Diagnostic complete.");
    Ok(())
}

fn show(value: Option<i32>) -> String {
    value.map_or_else(|| "no reply".to_string(), |v| v.to_string())
}
