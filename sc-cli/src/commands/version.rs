//! Version command - show version information.

use anyhow::Result;

/// Version information.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the version command.
pub fn run() -> Result<()> {
    println!("space-cloud - cluster coordination");
    println!();
    println!("Version:     {}", VERSION);
    println!(
        "Platform:    {} / {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!();
    println!("Components:");
    println!("  sc-core      Config document, file load/store");
    println!("  sc-cluster   Gossip membership, Raft log, config state machine");
    println!("  sc-cli       Command-line interface");

    Ok(())
}
