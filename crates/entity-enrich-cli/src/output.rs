//! Plain-text status printing. No color/table crates: this CLI is meant to
//! pipe cleanly into logs as well as a terminal.

pub fn print_error(msg: &str) {
    eprintln!("ERROR: {msg}");
}

pub fn print_warning(msg: &str) {
    eprintln!("WARNING: {msg}");
}

pub fn print_success(msg: &str) {
    println!("[ok] {msg}");
}

pub fn print_info(msg: &str) {
    println!("[info] {msg}");
}
