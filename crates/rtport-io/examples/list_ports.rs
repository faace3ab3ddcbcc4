//! Print every MIDI port the platform driver can see.
//!
//!   cargo run -p rtport-io --example list_ports

use rtport_io::{is_platform_supported, MidiContext};

fn main() -> rtport_io::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    if !is_platform_supported() {
        println!("No native MIDI API in this build; listing the in-memory driver.");
    }

    let midi = MidiContext::new()?;
    for api in midi.list_available_apis() {
        println!("API: {} ({})", api.display_name(), api.name());
    }
    println!("Virtual ports: {}", midi.supports_virtual_ports());

    println!("\nInputs:");
    for port in midi.list_readable_ports()? {
        println!("  {}", port);
    }
    println!("\nOutputs:");
    for port in midi.list_writable_ports()? {
        println!("  {}", port);
    }
    Ok(())
}
