//! Firmware info and port listing command implementations.

use {
    anyhow::Result,
    bleflash::{
        Bl702Commands, ChunkPlanner, CommandSet, FileSource, ImageSource, MAX_PACKET_PAYLOAD,
        fragment, list_ports,
    },
    console::style,
    std::path::Path,
};

/// Transfer plan of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PagePlan {
    pub index: usize,
    pub offset: usize,
    pub len: usize,
    pub packets: usize,
}

/// Transfer plan of a whole image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImagePlan {
    pub total_bytes: usize,
    pub erase_packets: usize,
    pub pages: Vec<PagePlan>,
}

impl ImagePlan {
    pub(crate) fn total_packets(&self) -> usize {
        self.erase_packets
            + self
                .pages
                .iter()
                .map(|p| p.packets)
                .sum::<usize>()
    }
}

pub(crate) fn plan(planner: &mut ChunkPlanner, commands: &impl CommandSet) -> Result<ImagePlan> {
    let total_bytes = planner.total_bytes();
    let erase_packets = fragment(&commands.erase_flash(total_bytes)?).len();

    planner.reset();
    let mut pages = Vec::new();
    while let Some(page) = planner.next_page() {
        pages.push(PagePlan {
            index: page.index,
            offset: page.offset,
            len: page.len(),
            packets: fragment(&commands.program_page(page.data)?).len(),
        });
    }

    Ok(ImagePlan {
        total_bytes,
        erase_packets,
        pages,
    })
}

/// Info command implementation.
pub(crate) fn cmd_info(firmware: &Path, json: bool) -> Result<()> {
    let image = FileSource::new(firmware).load()?;
    let mut planner = ChunkPlanner::new(image);
    let plan = plan(&mut planner, &Bl702Commands)?;

    if json {
        let pages: Vec<serde_json::Value> = plan
            .pages
            .iter()
            .map(|p| {
                serde_json::json!({
                    "index": p.index,
                    "offset": p.offset,
                    "len": p.len,
                    "packets": p.packets,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "file": firmware.display().to_string(),
                "total_bytes": plan.total_bytes,
                "page_count": plan.pages.len(),
                "max_packet_payload": MAX_PACKET_PAYLOAD,
                "erase_packets": plan.erase_packets,
                "total_packets": plan.total_packets(),
                "pages": pages,
            }
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output)?
        );
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Firmware Information")
            .bold()
            .underlined()
    );
    eprintln!("  File:     {}", style(firmware.display()).cyan());
    eprintln!("  Size:     {} bytes", plan.total_bytes);
    eprintln!("  Pages:    {}", plan.pages.len());
    eprintln!(
        "  Packets:  {} ({} per page max, {} byte payload)",
        plan.total_packets(),
        plan.pages
            .iter()
            .map(|p| p.packets)
            .max()
            .unwrap_or(0),
        MAX_PACKET_PAYLOAD
    );

    eprintln!();
    eprintln!(
        "  {:<6} {:<10} {:<8} {}",
        style("Page").bold(),
        style("Offset").bold(),
        style("Bytes").bold(),
        style("Packets").bold()
    );
    for page in &plan.pages {
        eprintln!(
            "  {:<6} 0x{:08X} {:<8} {}",
            page.index, page.offset, page.len, page.packets
        );
    }

    Ok(())
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = list_ports()?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output)?
        );
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Available serial ports")
            .bold()
            .underlined()
    );

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bleflash::FirmwareImage;

    #[test]
    fn test_plan_for_partial_last_page() {
        let mut planner = ChunkPlanner::new(FirmwareImage::new(vec![0u8; 10_000]));
        let plan = plan(&mut planner, &Bl702Commands).unwrap();

        assert_eq!(plan.total_bytes, 10_000);
        let lens: Vec<usize> = plan
            .pages
            .iter()
            .map(|p| p.len)
            .collect();
        assert_eq!(lens, vec![4096, 4096, 1808]);
        assert_eq!(plan.pages[2].offset, 8192);

        // 4096 + 4 header bytes over 240 byte packets
        assert_eq!(plan.pages[0].packets, 18);
        // 1808 + 4 header bytes
        assert_eq!(plan.pages[2].packets, 8);
        assert_eq!(plan.erase_packets, 1);
        assert_eq!(plan.total_packets(), 1 + 18 + 18 + 8);
    }

    #[test]
    fn test_info_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_info(&dir.path().join("missing.bin"), true).is_err());
    }
}
