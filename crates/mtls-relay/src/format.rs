const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

/// Human-readable transfer size: plain bytes below 1 KB, otherwise KB or MB
/// (base 1024) with two decimals.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < KIB {
        format!("{} B", bytes)
    } else if bytes < MIB {
        format!("{:.2} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.2} MB", bytes as f64 / MIB as f64)
    }
}
