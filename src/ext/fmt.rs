use std::{
    fmt::{self, Display, Debug},
    path::{Path, PathBuf},
};

/// Pretty path formatting: replace $HOME with ~, put quotes around if needed.
pub fn path(path: &Path) -> String {
    lazy_static::lazy_static!{
        static ref HOME: Option<PathBuf> = std::env::var_os("HOME").map(|s| PathBuf::from(s));
    }
    if let Some(home) = (*HOME).as_ref() {
        if let Ok(suffix) = path.strip_prefix(home) {
            let tilde_path = Path::new("~").join(suffix);
            let s = tilde_path.to_string_lossy();
            return if s.contains(char::is_whitespace) { format!("'{}'", s) } else { s.into_owned() };
        }
    }
    let s = path.to_string_lossy();
    if s.contains(char::is_whitespace) { format!("'{}'", s) } else { s.into_owned() }
}

/// Formats duration as `HH:MM:SS.SSS`.
pub struct Duration(pub std::time::Duration);

impl Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const IN_HOUR: u64 = 3600;
        const IN_MINUTE: u64 = 60;
        let mut seconds = self.0.as_secs();
        write!(f, "{}:", seconds / IN_HOUR)?;
        seconds %= IN_HOUR;
        write!(f, "{:02}:", seconds / IN_MINUTE)?;
        seconds %= IN_MINUTE;
        write!(f, "{:02}.{:03}", seconds, self.0.subsec_millis())?;
        Ok(())
    }
}

impl Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Formats number of bytes with a decimal suffix (`1.5G`, `320.0M`, ...),
/// same suffixes as accepted by `algo::parse_int`.
pub struct Bytes(pub u64);

impl Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const SUFFIXES: [&'static str; 4] = ["K", "M", "G", "T"];
        let mut val = self.0 as f64;
        if val < 1000.0 {
            return write!(f, "{}B", self.0);
        }
        for suffix in SUFFIXES.iter() {
            val /= 1000.0;
            if val < 1000.0 {
                return write!(f, "{:.1}{}", val, suffix);
            }
        }
        write!(f, "{:.1}{}", val, SUFFIXES[SUFFIXES.len() - 1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_and_bytes() {
        let d = Duration(std::time::Duration::from_millis(3_723_045));
        assert_eq!(d.to_string(), "1:02:03.045");
        assert_eq!(Bytes(512).to_string(), "512B");
        assert_eq!(Bytes(1_500_000_000).to_string(), "1.5G");
        assert_eq!(Bytes(60_000).to_string(), "60.0K");
    }
}
