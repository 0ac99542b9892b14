use colored::Colorize;
use reconcile::{ExecuteSummary, Method, RestRequest};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Requests
// ============================================================================

/// Marker for a request in a plan listing
pub fn marker(method: Method) -> &'static str {
    match method {
        Method::Post => "+",
        Method::Patch => "~",
        Method::Delete => "-",
        Method::Noop => " ",
    }
}

/// Print one planned request
pub fn request(req: &RestRequest) {
    let mark = marker(req.method);
    let mark = match req.method {
        Method::Post => mark.green(),
        Method::Patch => mark.yellow(),
        Method::Delete => mark.red(),
        Method::Noop => mark.dimmed(),
    };
    let trans = if req.with_trans { "" } else { " (direct)" };
    println!(
        "  {} {:<6} {} {}{}",
        mark,
        req.method.as_str(),
        req.kind.dimmed(),
        req.key(),
        trans.dimmed()
    );
}

/// One-line description of an executed batch
pub fn summary_line(summary: &ExecuteSummary) -> String {
    let mut parts = Vec::new();
    for (count, what) in [
        (summary.created, "created"),
        (summary.updated, "updated"),
        (summary.deleted, "deleted"),
        (summary.uploaded, "uploaded"),
    ] {
        if count > 0 {
            parts.push(format!("{count} {what}"));
        }
    }
    if parts.is_empty() {
        "no changes".to_string()
    } else {
        parts.join(", ")
    }
}

// ============================================================================
// Tests
// ============================================================================
