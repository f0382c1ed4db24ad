use colored::Colorize;

/// Print tool version.
pub(super) fn print_version() {
    println!("{} {}", env!("CARGO_PKG_NAME").underline(), format!("v{}", env!("CARGO_PKG_VERSION")).green());
}

/// Formats default value for the help message.
pub(super) fn fmt_def(val: impl std::fmt::Display) -> String {
    format!("[{}]", val.to_string().cyan())
}
