//! Result Formatter (spec.md §2, §4): ANSI-colored status icons, section
//! headers, and censor-finding lines. Direct port of the original
//! `testUtils.py` color palette and helpers; the teacher's binary has no
//! color crate in its dependency tree, and neither does this one — the
//! codes are few enough, and fixed enough, that hand-rolling them here
//! matches the corpus's own texture rather than adding a dependency for
//! eight constant escape sequences.

pub const RESET: &str = "\x1b[0m";
pub const RED: &str = "\x1b[91m";
pub const GREEN: &str = "\x1b[92m";
pub const YELLOW: &str = "\x1b[93m";
pub const CYAN: &str = "\x1b[96m";
pub const MAGENTA: &str = "\x1b[95m";

const DISPLAY_WIDTH: usize = 50;

/// The cyan "test start" header or the magenta "test result" header,
/// matching `testUtils.printHeader`.
pub fn print_header(title: &str, is_result: bool) {
    let sep = format!("\n{}\n", "=".repeat(DISPLAY_WIDTH));
    let color = if is_result { MAGENTA } else { CYAN };
    println!("{color}{sep}{:^width$}{sep}{RESET}", title, width = DISPLAY_WIDTH);
}

/// Tri-state result icon: `Some(true)` success, `Some(false)` failure,
/// `None` inconclusive (with an optional annotation, e.g. "resolved 2/3").
pub fn result_icon(success: Option<bool>, info: Option<&str>) -> String {
    let (color, icon) = match success {
        Some(true) => (GREEN, "\u{2714}"),
        Some(false) => (RED, "\u{2716}"),
        None => (YELLOW, "?"),
    };
    let mut rendered = icon.to_string();
    if let Some(info) = info {
        rendered.push(' ');
        rendered.push_str(info);
    }
    format!("({color}{rendered}{RESET})")
}

/// Renders a group's list of censor findings, or "No censorship detected"
/// if the list is empty.
pub fn censors_string(censors: &[String]) -> String {
    if censors.is_empty() {
        "    No censorship detected\n".to_string()
    } else {
        censors.iter().map(|c| format!("    Censorship detected: {RED}{c}{RESET}\n")).collect()
    }
}
