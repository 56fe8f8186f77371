//! Console rendering: status lines, the VM table, the describe list and the
//! progress dots shown while operations run.

use std::io::IsTerminal;
use std::sync::atomic::{AtomicUsize, Ordering};

use console::{Alignment, measure_text_width, pad_str, style};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::commands::VmListItem;
use crate::progress::TickSink;
use crate::vm::Status;

const TABLE_HEADERS: [&str; 7] = [
    "Name",
    "Project",
    "Zone",
    "Machine-Type",
    "Status",
    "Schedule",
    "Uptime",
];

const DETAIL_HEADERS: [&str; 7] = [
    "Name",
    "Project",
    "Zone",
    "MachineType",
    "Status",
    "SchedulePolicy",
    "Uptime",
];

// 256-color palette index used for headers and borders
const ACCENT: u8 = 99;

pub fn success(message: &str) {
    println!("{}{message}", style("[SUCCESS] | ").green().bold());
}

pub fn error(message: &str) {
    eprintln!("{}{message}", style("[ERROR] | ").for_stderr().red().bold());
}

pub fn status_emoji(status: Status) -> &'static str {
    match status {
        Status::Running => "\u{1F7E2}",
        Status::Stopped | Status::Terminated => "\u{1F534}",
        _ => "\u{26AA}",
    }
}

fn row(item: &VmListItem) -> [String; 7] {
    let vm = &item.vm;
    [
        vm.name().to_string(),
        vm.project().to_string(),
        vm.zone().to_string(),
        vm.machine_type.clone(),
        format!("{} {}", status_emoji(vm.status), vm.status),
        vm.schedule_policy.clone(),
        item.uptime.clone(),
    ]
}

/// Bordered table of VMs, one row per item.
pub fn render_table(items: &[VmListItem]) -> String {
    let rows: Vec<[String; 7]> = items.iter().map(row).collect();

    let mut widths = TABLE_HEADERS.map(measure_text_width);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(measure_text_width(cell));
        }
    }

    let border = |left: &str, mid: &str, right: &str| {
        let segments: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
        style(format!("{left}{}{right}", segments.join(mid)))
            .color256(ACCENT)
            .to_string()
    };
    let bar = style("│").color256(ACCENT).to_string();
    let line = |cells: Vec<String>| {
        let mut out = bar.clone();
        for cell in cells {
            out.push_str(&format!(" {cell} {bar}"));
        }
        out
    };

    let mut out = Vec::with_capacity(rows.len() + 4);
    out.push(border("┌", "┬", "┐"));
    out.push(line(
        TABLE_HEADERS
            .iter()
            .zip(&widths)
            .map(|(h, w)| {
                style(pad_str(h, *w, Alignment::Center, None))
                    .color256(ACCENT)
                    .bold()
                    .to_string()
            })
            .collect(),
    ));
    out.push(border("├", "┼", "┤"));
    for row in &rows {
        out.push(line(
            row.iter()
                .zip(&widths)
                .map(|(cell, w)| pad_str(cell, *w, Alignment::Left, None).into_owned())
                .collect(),
        ));
    }
    out.push(border("└", "┴", "┘"));
    out.join("\n")
}

/// Bullet list of one VM's fields with aligned colons.
pub fn render_detail(item: &VmListItem) -> String {
    let vm = &item.vm;
    let values = [
        vm.name().to_string(),
        vm.project().to_string(),
        vm.zone().to_string(),
        vm.machine_type.clone(),
        vm.status.to_string(),
        vm.schedule_policy.clone(),
        item.uptime.clone(),
    ];
    let width = DETAIL_HEADERS
        .iter()
        .map(|h| h.len())
        .max()
        .unwrap_or(0);

    DETAIL_HEADERS
        .iter()
        .zip(values)
        .map(|(header, value)| {
            let padding = " ".repeat(width - header.len() + 1);
            format!(
                " \u{2022} {}{padding}: {value}",
                style(header).color256(212).bold()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn version(version: &str, commit: &str, date: &str) -> String {
    format!("gcectl version {version}\ncommit: {commit}\nbuilt at: {date}")
}

// ── progress dots ─────────────────────────────────────────

/// A `message...` line on stderr that grows by one dot per tick.
///
/// On a terminal the line is drawn through indicatif so log output does not
/// tear it; otherwise dots are written directly.
pub struct ProgressLine {
    bar: Option<ProgressBar>,
    dots: AtomicUsize,
}

impl ProgressLine {
    pub fn start(message: &str) -> Self {
        if std::io::stderr().is_terminal() {
            let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
            bar.set_style(
                ProgressStyle::with_template("{prefix}{msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.set_prefix(message.to_string());
            bar.tick();
            Self {
                bar: Some(bar),
                dots: AtomicUsize::new(0),
            }
        } else {
            eprint!("{message}");
            Self {
                bar: None,
                dots: AtomicUsize::new(0),
            }
        }
    }

    /// The terminal bar, when drawing through indicatif.
    pub fn bar(&self) -> Option<&ProgressBar> {
        self.bar.as_ref()
    }

    /// End the line, leaving it on screen.
    pub fn finish(&self) {
        match &self.bar {
            Some(bar) => bar.finish(),
            None => eprintln!(),
        }
    }
}

impl TickSink for ProgressLine {
    fn tick(&self) {
        let dots = self.dots.fetch_add(1, Ordering::Relaxed) + 1;
        match &self.bar {
            Some(bar) => bar.set_message(".".repeat(dots)),
            None => eprint!("."),
        }
    }
}
