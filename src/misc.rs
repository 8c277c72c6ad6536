// Gonimbus object storage toolkit.
// Copyright 2025 Gonimbus developers.

//! Generally useful functions.

use std::time::Duration;

/// Render a duration in a compact human form: `"450ms"`, `"12s"`,
/// `"2m 5s"`, `"1h 2m 3s"`.
pub fn duration_human(d: Duration) -> String {
    let total_secs = d.as_secs();
    if total_secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h "));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m "));
    }
    out.push_str(&format!("{seconds}s"));
    out
}

/// Generate a random lowercase alphanumeric suffix for probe keys.
pub(crate) fn random_suffix(len: usize) -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[test]
    fn human_durations() {
        assert_eq!(duration_human(Duration::from_millis(450)), "450ms");
        assert_eq!(duration_human(Duration::from_secs(12)), "12s");
        assert_eq!(duration_human(Duration::from_secs(125)), "2m 5s");
        assert_eq!(duration_human(Duration::from_secs(3723)), "1h 2m 3s");
    }

    #[test]
    fn random_suffix_shape() {
        let s = random_suffix(16);
        assert_eq!(s.len(), 16);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(random_suffix(16), random_suffix(16));
    }
}
