// Keyboard teleop
// Base: WASD drive/turn, R/F speed, Space stop
// Arm: H home, G draw ready, V draw, O/C open/close claw, L limp, T telemetry
//      arrow keys nudge base/elbow, U/J lift/lower pen
// Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use rerobot_runtime::arm::Joint;
use rerobot_runtime::config::{TOPIC_CMD_ARM, TOPIC_CMD_BASE};
use rerobot_runtime::messages::{ArmCommand, ArmPreset, BaseCommand};

const SPEEDS: [i32; 3] = [100, 250, 400]; // mm/s
const THETA_SPEEDS: [i32; 3] = [15, 45, 90]; // deg/s
const INPUT_TIMEOUT_MS: u64 = 100; // Reset velocities after this much time with no input
const PUBLISH_PERIOD: Duration = Duration::from_millis(100);

// Arm jog step (tenths of a degree) and speed
const JOG_STEP: i32 = 5;
const JOG_SPEED: u32 = 20;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let pub_base = session.declare_publisher(TOPIC_CMD_BASE).await?;
    let pub_arm = session.declare_publisher(TOPIC_CMD_ARM).await?;

    info!("Base: WASD=drive, R/F=speed, Space=stop");
    info!("Arm: H=home, G=ready, V=draw, O/C=claw, L=limp, T=telemetry, arrows/U/J=jog");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&pub_base, &pub_arm).await;
    disable_raw_mode()?;

    result
}

fn jog(joint: Joint, delta: i32) -> ArmCommand {
    ArmCommand::MoveJointRelative {
        joint,
        delta,
        speed: Some(JOG_SPEED),
    }
}

async fn run_teleop(
    pub_base: &zenoh::pubsub::Publisher<'_>,
    pub_arm: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;

    // Persistent velocity state
    let mut drive = 0;
    let mut turn = 0;
    let mut last_movement_input = Instant::now();
    let mut last_publish = Instant::now();
    let mut was_moving = false;

    loop {
        let mut arm_cmd = None;
        let mut base_cmd = None;

        // Poll for key with 20ms timeout
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    // Base movement - update velocity and refresh timestamp
                    KeyCode::Char('w') if pressed => {
                        drive = SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        drive = -SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        turn = THETA_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        turn = -THETA_SPEEDS[speed_idx];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char(' ') if pressed => base_cmd = Some(BaseCommand::Stop),

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Arm presets
                    KeyCode::Char('h') if pressed => {
                        arm_cmd = Some(ArmCommand::Preset {
                            preset: ArmPreset::Home,
                        })
                    }
                    KeyCode::Char('g') if pressed => {
                        arm_cmd = Some(ArmCommand::Preset {
                            preset: ArmPreset::DrawReady,
                        })
                    }
                    KeyCode::Char('v') if pressed => {
                        arm_cmd = Some(ArmCommand::Preset {
                            preset: ArmPreset::Draw,
                        })
                    }
                    KeyCode::Char('o') if pressed => {
                        arm_cmd = Some(ArmCommand::Preset {
                            preset: ArmPreset::OpenClaw,
                        })
                    }
                    KeyCode::Char('c') if pressed => {
                        arm_cmd = Some(ArmCommand::Preset {
                            preset: ArmPreset::CloseClaw,
                        })
                    }
                    KeyCode::Char('l') if pressed => arm_cmd = Some(ArmCommand::Limp),
                    KeyCode::Char('t') if pressed => arm_cmd = Some(ArmCommand::Telemetry),

                    // Arm jog
                    KeyCode::Up if pressed => arm_cmd = Some(jog(Joint::Elbow, -JOG_STEP)),
                    KeyCode::Down if pressed => arm_cmd = Some(jog(Joint::Elbow, JOG_STEP)),
                    KeyCode::Left if pressed => arm_cmd = Some(jog(Joint::Base, -JOG_STEP)),
                    KeyCode::Right if pressed => arm_cmd = Some(jog(Joint::Base, JOG_STEP)),
                    KeyCode::Char('u') if pressed => arm_cmd = Some(jog(Joint::Wrist, -JOG_STEP)),
                    KeyCode::Char('j') if pressed => arm_cmd = Some(jog(Joint::Wrist, JOG_STEP)),

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if let Some(cmd) = arm_cmd {
            pub_arm.put(serde_json::to_string(&cmd)?).await?;
        }

        // Reset velocities if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            drive = 0;
            turn = 0;
        }

        if base_cmd.is_none() && last_publish.elapsed() >= PUBLISH_PERIOD {
            let moving = drive != 0 || turn != 0;
            base_cmd = if turn != 0 {
                Some(BaseCommand::RotateVelocity { deg_per_sec: turn })
            } else if moving || was_moving {
                Some(BaseCommand::Velocity { mm_per_sec: drive })
            } else {
                None
            };
            was_moving = moving;
        }

        if let Some(cmd) = base_cmd {
            pub_base.put(serde_json::to_string(&cmd)?).await?;
            last_publish = Instant::now();
        }
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
