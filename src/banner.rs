//! Startup banner for `restora serve`.

use std::fmt::Write as _;
use std::path::Path;

use crate::consts::{AUTHOR, HOMEPAGE, REPO};
use crate::request::BackendKind;

/// Where one backend runs.
pub enum BackendLocation<'a> {
    Local { program: &'a str, script: &'a str },
    Remote { url: &'a str },
}

pub struct BannerInfo<'a> {
    pub bind: &'a str,
    pub output_root: &'a Path,
    pub timeout_secs: u64,
    pub backends: Vec<(BackendKind, BackendLocation<'a>)>,
}

pub fn render_banner(info: &BannerInfo) -> String {
    let mut out = format!(
        r#"
   ╔═══════════════════════════════════════╗
   ║            R E S T O R A              ║
   ║     old faces, patiently mended       ║
   ╚═══════════════════════════════════════╝

   version   {}
   by        {}
   home      {}
   repo      {}
   listen    {}
   output    {}
   timeout   {}s
"#,
        env!("CARGO_PKG_VERSION"),
        AUTHOR,
        HOMEPAGE,
        REPO,
        info.bind,
        info.output_root.display(),
        info.timeout_secs,
    );

    for (kind, location) in &info.backends {
        let _ = match location {
            BackendLocation::Local { program, script } if script.is_empty() => {
                writeln!(out, "   {:<9} {program}", kind.as_str())
            }
            BackendLocation::Local { program, script } => {
                writeln!(out, "   {:<9} {program} {script}", kind.as_str())
            }
            BackendLocation::Remote { url } => {
                writeln!(out, "   {:<9} -> {url}", kind.as_str())
            }
        };
    }
    out
}

pub fn print_banner(info: &BannerInfo) {
    println!("{}", render_banner(info));
}
