//! Status text shown to the sender of a file.

use driverelay_transfer::TransferProgress;

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
const BAR_CELLS: usize = 10;

/// Formats a byte count with base-1024 units and up to two decimals,
/// e.g. `1.5 MB`. Zero is `0B`.
pub fn readable_size(bytes: f64) -> String {
    if bytes <= 0.0 || !bytes.is_finite() {
        return "0B".to_string();
    }
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", SIZE_UNITS[unit])
}

/// Ten-cell bar, one filled cell per full 10 %.
pub fn progress_bar(percentage: f64) -> String {
    let filled = ((percentage / 10.0).floor().max(0.0) as usize).min(BAR_CELLS);
    let mut bar = "▰".repeat(filled);
    bar.push_str(&"▱".repeat(BAR_CELLS - filled));
    bar
}

pub fn render_queued(file_name: &str) -> String {
    format!("Queued: {file_name}\nWaiting for a free upload slot...")
}

pub fn render_progress(progress: &TransferProgress) -> String {
    let percentage = progress.percentage();
    format!(
        "Uploading to Drive...\n[{}] {:.2}%\nSpeed: {}/s\nSize: {} / {}",
        progress_bar(percentage),
        percentage,
        readable_size(progress.speed()),
        readable_size(progress.transferred_bytes as f64),
        readable_size(progress.total_bytes as f64),
    )
}

pub fn render_success(file_name: &str) -> String {
    format!("Success!\nFile: {file_name}")
}

pub fn render_cancelled(file_name: &str) -> String {
    format!("Cancelled.\nFile: {file_name}")
}

pub fn render_error(message: &str) -> String {
    format!("Error: {message}")
}
