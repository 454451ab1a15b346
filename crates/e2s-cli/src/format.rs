//! Human-readable rendering for CLI text output.

use chrono::DateTime;
use e2s::{BlockNumber, DirListing, FileType, InodeInfo, SuperblockSummary};
use std::fmt::Write as _;

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Blocks printed per row by [`block_rows`].
pub const BLOCKS_PER_ROW: usize = 16;

/// `1536` → `"1.50 KB"`. Base 1024, two decimals, capped at TB.
#[allow(clippy::cast_precision_loss)]
pub fn human_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", SIZE_UNITS[unit])
}

/// Seconds since the epoch as `YYYY-MM-DD HH:MM:SS` in UTC.
pub fn format_timestamp(secs: u32) -> String {
    DateTime::from_timestamp(i64::from(secs), 0).map_or_else(
        || secs.to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

/// `ls -l` style mode string, e.g. `drwxr-xr-x`.
pub fn mode_string(file_type: FileType, permissions: u16) -> String {
    let kind = match file_type {
        FileType::Regular => '-',
        FileType::Directory => 'd',
        FileType::Symlink => 'l',
        FileType::BlockDevice => 'b',
        FileType::CharDevice => 'c',
        FileType::Fifo => 'p',
        FileType::Socket => 's',
        FileType::Unknown => '?',
    };
    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6_u16, 3, 0] {
        let bits = (permissions >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

/// `Header:` followed by a blank line and one `key: value` line per field.
pub fn render_fields(header: &str, fields: &[(&str, String)]) -> String {
    let mut out = format!("{header}:\n\n");
    for (key, value) in fields {
        let _ = writeln!(out, "{key}: {value}");
    }
    out
}

pub fn superblock_fields(s: &SuperblockSummary) -> Vec<(&'static str, String)> {
    vec![
        ("volume_name", s.volume_name.clone()),
        ("uuid", s.uuid.clone()),
        ("magic", format!("{:#06x}", s.magic)),
        (
            "revision",
            format!("{}.{}", s.revision, s.minor_revision),
        ),
        ("creator_os", s.creator_os.clone()),
        ("state", s.state.clone()),
        ("errors", s.errors_policy.clone()),
        ("block_size", s.block_size.to_string()),
        ("blocks_count", s.blocks_count.to_string()),
        ("free_blocks_count", s.free_blocks_count.to_string()),
        ("reserved_blocks_count", s.reserved_blocks_count.to_string()),
        ("free_blocks_percent", format!("{:.2}%", s.free_blocks_percent)),
        ("inodes_count", s.inodes_count.to_string()),
        ("free_inodes_count", s.free_inodes_count.to_string()),
        ("free_inodes_percent", format!("{:.2}%", s.free_inodes_percent)),
        ("first_data_block", s.first_data_block.to_string()),
        ("blocks_per_group", s.blocks_per_group.to_string()),
        ("inodes_per_group", s.inodes_per_group.to_string()),
        ("groups_count", s.groups_count.to_string()),
        ("inode_size", s.inode_size.to_string()),
        ("first_ino", s.first_ino.to_string()),
        ("mount_count", s.mount_count.to_string()),
        ("max_mount_count", s.max_mount_count.to_string()),
        ("last_mount_time", format_timestamp(s.last_mount_time)),
        ("last_write_time", format_timestamp(s.last_write_time)),
        ("last_check_time", format_timestamp(s.last_check_time)),
        ("last_mounted", s.last_mounted.clone()),
        ("features_compat", s.features_compat.clone()),
        ("features_incompat", s.features_incompat.clone()),
        ("features_ro_compat", s.features_ro_compat.clone()),
    ]
}

pub fn inode_fields(info: &InodeInfo) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("inode", info.inode.to_string()),
        ("group", info.group.to_string()),
        ("type", info.file_type.to_string()),
        (
            "mode",
            format!(
                "{:06o} ({})",
                info.mode,
                mode_string(info.file_type, info.permissions)
            ),
        ),
        ("uid", info.uid.to_string()),
        ("gid", info.gid.to_string()),
        ("size", format!("{} ({})", info.size, human_size(info.size))),
        ("links_count", info.links_count.to_string()),
        ("sectors", info.sectors.to_string()),
        ("flags", format!("{:#x}", info.flags)),
        ("generation", info.generation.to_string()),
        ("file_acl", info.file_acl.to_string()),
        ("atime", format_timestamp(info.atime)),
        ("ctime", format_timestamp(info.ctime)),
        ("mtime", format_timestamp(info.mtime)),
        ("dtime", format_timestamp(info.dtime)),
    ];
    if let Some(target) = &info.symlink_target {
        fields.push(("symlink_target", target.clone()));
    }
    let pointers: Vec<String> = info
        .raw_block_pointers
        .iter()
        .map(ToString::to_string)
        .collect();
    fields.push(("block_pointers", pointers.join(" ")));
    fields
}

/// One `ls -l` style line per entry.
pub fn listing_lines(entries: &[DirListing]) -> Vec<String> {
    entries
        .iter()
        .map(|e| {
            format!(
                "{} {:>8} {:>3} {:>5} {:>5} {:>11}  {}",
                mode_string(e.file_type, e.mode),
                e.inode.0,
                e.links_count,
                e.uid,
                e.gid,
                human_size(e.size),
                e.name
            )
        })
        .collect()
}

/// Block numbers, [`BLOCKS_PER_ROW`] to a line.
pub fn block_rows(blocks: &[BlockNumber]) -> Vec<String> {
    blocks
        .chunks(BLOCKS_PER_ROW)
        .map(|row| {
            row.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2s::InodeNumber;

    #[test]
    fn human_size_steps_through_units() {
        assert_eq!(human_size(0), "0.00 B");
        assert_eq!(human_size(1023), "1023.00 B");
        assert_eq!(human_size(1024), "1.00 KB");
        assert_eq!(human_size(1536), "1.50 KB");
        assert_eq!(human_size(5000), "4.88 KB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.00 MB");
        assert_eq!(human_size(1 << 40), "1.00 TB");
        assert_eq!(human_size(1 << 50), "1024.00 TB");
    }

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20");
    }

    #[test]
    fn mode_strings() {
        assert_eq!(mode_string(FileType::Directory, 0o755), "drwxr-xr-x");
        assert_eq!(mode_string(FileType::Regular, 0o644), "-rw-r--r--");
        assert_eq!(mode_string(FileType::Symlink, 0o777), "lrwxrwxrwx");
        assert_eq!(mode_string(FileType::Fifo, 0o600), "prw-------");
    }

    #[test]
    fn rendered_fields_have_header() {
        let text = render_fields(
            "Filesystem Information",
            &[("block_size", "1024".to_owned())],
        );
        assert_eq!(text, "Filesystem Information:\n\nblock_size: 1024\n");
    }

    #[test]
    fn block_rows_wrap_at_sixteen() {
        let blocks: Vec<BlockNumber> = (100..120).map(BlockNumber).collect();
        let rows = block_rows(&blocks);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("100 101"));
        assert_eq!(rows[1], "116 117 118 119");
    }

    #[test]
    fn inode_fields_show_octal_mode_and_pointers() {
        let mut raw = [0_u32; 15];
        raw[0] = 65;
        let info = InodeInfo {
            inode: InodeNumber(21),
            group: 0,
            file_type: FileType::Regular,
            mode: 0o100_644,
            permissions: 0o644,
            uid: 0,
            gid: 0,
            size: 5000,
            links_count: 1,
            sectors: 10,
            flags: 0,
            generation: 0,
            file_acl: 0,
            atime: 0,
            ctime: 0,
            mtime: 0,
            dtime: 0,
            raw_block_pointers: raw,
            symlink_target: None,
        };
        let fields = inode_fields(&info);
        let get = |key: &str| {
            fields
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
                .expect("field")
        };
        assert_eq!(get("mode"), "100644 (-rw-r--r--)");
        assert_eq!(get("size"), "5000 (4.88 KB)");
        assert!(get("block_pointers").starts_with("65 0 0"));
        assert!(fields.iter().all(|(k, _)| *k != "symlink_target"));
    }
}
