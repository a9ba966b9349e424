use anyhow::Result;
use rtvoice::audio;

pub(crate) fn list_input_devices() -> Result<()> {
    // RTVOICE_TEST_DEVICES stands in for the host's device list in tests.
    let devices = if let Ok(raw) = std::env::var("RTVOICE_TEST_DEVICES") {
        parse_device_list(&raw)
    } else {
        audio::list_input_devices().unwrap_or_else(|err| {
            eprintln!("Failed to list audio input devices: {err}");
            Vec::new()
        })
    };

    if devices.is_empty() {
        println!("No audio input devices detected.");
    } else {
        println!("Available audio input devices:");
        for name in devices {
            println!("  - {name}");
        }
    }
    Ok(())
}

fn parse_device_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
