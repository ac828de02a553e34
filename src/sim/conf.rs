//! sys161.conf rendering
//!
//! Renders a run's resolved machine configuration into the static
//! configuration file sys161 reads at startup. Disabled devices simply
//! produce no line.

use crate::common::config::{DiskConf, SimConf};

/// Render a sys161.conf for the given machine configuration and seed
pub fn render_conf(sim: &SimConf, seed: u32) -> String {
    let mut lines: Vec<String> = vec!["0\tserial".to_string(), "1\temufs".to_string()];

    if sim.disk1.enabled {
        lines.push(disk_line(2, "LHD0.img", &sim.disk1));
    }
    if sim.disk2.enabled {
        lines.push(disk_line(3, "LHD1.img", &sim.disk2));
    }

    lines.push(format!("28\trandom seed={}", seed));
    lines.push("29\ttimer".to_string());
    lines.push("30\ttrace".to_string());
    lines.push(format!(
        "31\tmainboard ramsize={} cpus={}",
        sim.ram, sim.cpus
    ));

    let mut out = String::new();
    for line in lines {
        if !line.trim().is_empty() {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

fn disk_line(slot: u32, file: &str, disk: &DiskConf) -> String {
    let nodoom = if disk.nodoom { " nodoom" } else { "" };
    format!(
        "{}\tdisk rpm={} file={}{} # bytes={}",
        slot, disk.rpm, file, nodoom, disk.bytes
    )
}
