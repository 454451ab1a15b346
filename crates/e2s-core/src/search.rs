//! Depth-first name search from the root directory.
//!
//! The walk keeps an explicit stack of directory cursors instead of
//! recursing, so a deep tree costs heap, not call stack. Entries are visited
//! in on-disk order and a directory's own match is reported before anything
//! beneath it.
//!
//! Each directory inode is expanded at most once. A second name for a
//! directory (a link back to an ancestor, or a hard link shared between two
//! parents) is matched like any other entry but not entered again, so the
//! work is bounded by the number of distinct directories whatever the links
//! on disk look like.

use crate::{DirEntry, Ext2Volume, cx_checkpoint};
use e2s_error::{E2sError, Result};
use e2s_ondisk::FileType;
use e2s_types::{Cx, InodeNumber};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, trace, warn};

/// Directories nested deeper than this below the root are not expanded.
pub const DEFAULT_MAX_DEPTH: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    /// Deepest directory level that is still expanded; the root is level 0.
    pub max_depth: usize,
    /// Stop after this many matches.
    pub max_matches: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_matches: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchMatch {
    /// Absolute path, `/`-joined from the root.
    pub path: String,
    pub inode: InodeNumber,
    pub size: u64,
    pub file_type: FileType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbandonReason {
    DepthLimit { max_depth: usize },
    /// The directory is already open further up the current path.
    Cycle,
    /// The directory was already walked under `first_path`.
    AlreadyVisited { first_path: String },
    Corrupt { detail: String },
    Unreadable { detail: String },
}

impl AbandonReason {
    fn from_error(err: &E2sError) -> Self {
        if err.is_corruption() {
            Self::Corrupt {
                detail: err.to_string(),
            }
        } else {
            Self::Unreadable {
                detail: err.to_string(),
            }
        }
    }
}

/// A subtree the search could not enter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbandonedBranch {
    pub path: String,
    pub inode: InodeNumber,
    pub reason: AbandonReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchReport {
    pub term: String,
    pub matches: Vec<SearchMatch>,
    pub abandoned: Vec<AbandonedBranch>,
    /// `max_matches` was reached before the walk finished.
    pub truncated: bool,
}

impl SearchReport {
    fn abandon(&mut self, path: String, inode: InodeNumber, reason: AbandonReason) {
        warn!(path = %path, ino = inode.0, ?reason, "abandoning branch");
        self.abandoned.push(AbandonedBranch {
            path,
            inode,
            reason,
        });
    }
}

/// One directory being walked.
struct DirCursor {
    inode: InodeNumber,
    path: String,
    depth: usize,
    entries: std::vec::IntoIter<DirEntry>,
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

impl Ext2Volume {
    /// Case-insensitive substring search over every name below the root.
    pub fn search_by_name(&self, cx: &Cx, term: &str) -> Result<SearchReport> {
        self.search_with_options(cx, term, &SearchOptions::default())
    }

    /// Search with explicit depth and match limits.
    ///
    /// A root directory with no readable record fails the search. A child
    /// that cannot be read is recorded in [`SearchReport::abandoned`] and its
    /// siblings are still visited; a directory damaged part way through is
    /// walked up to the damage and also recorded.
    pub fn search_with_options(
        &self,
        cx: &Cx,
        term: &str,
        options: &SearchOptions,
    ) -> Result<SearchReport> {
        if term.is_empty() {
            return Err(E2sError::InvalidArgument(
                "search term is empty".to_owned(),
            ));
        }
        let needle = term.to_lowercase();
        let mut report = SearchReport {
            term: term.to_owned(),
            ..SearchReport::default()
        };

        let root = self.scan_dir(cx, InodeNumber::ROOT)?;
        if let Some(err) = root.damage {
            if root.entries.is_empty() {
                return Err(err);
            }
            report.abandon("/".to_owned(), InodeNumber::ROOT, AbandonReason::from_error(&err));
        }
        let mut expanded = HashMap::from([(InodeNumber::ROOT, "/".to_owned())]);
        let mut stack = vec![DirCursor {
            inode: InodeNumber::ROOT,
            path: "/".to_owned(),
            depth: 0,
            entries: root.entries.into_iter(),
        }];

        while let Some(cursor) = stack.last_mut() {
            let Some(entry) = cursor.entries.next() else {
                stack.pop();
                continue;
            };
            let depth = cursor.depth + 1;
            let name = entry.name_str();
            let path = join_path(&cursor.path, &name);

            cx_checkpoint(cx)?;
            if entry.is_dot_or_dotdot() {
                continue;
            }
            trace!(path = %path, ino = entry.inode.0, depth, "visit");

            let child = match self.read_inode(cx, entry.inode) {
                Ok(inode) => inode,
                Err(E2sError::Cancelled) => return Err(E2sError::Cancelled),
                Err(err) => {
                    report.abandon(path, entry.inode, AbandonReason::from_error(&err));
                    continue;
                }
            };

            if name.to_lowercase().contains(&needle) {
                report.matches.push(SearchMatch {
                    path: path.clone(),
                    inode: entry.inode,
                    size: child.size,
                    file_type: child.file_type(),
                });
                if options
                    .max_matches
                    .is_some_and(|max| report.matches.len() >= max)
                {
                    report.truncated = true;
                    break;
                }
            }

            if !child.is_dir() {
                continue;
            }
            if let Some(first_path) = expanded.get(&entry.inode) {
                let reason = if stack.iter().any(|c| c.inode == entry.inode) {
                    AbandonReason::Cycle
                } else {
                    AbandonReason::AlreadyVisited {
                        first_path: first_path.clone(),
                    }
                };
                report.abandon(path, entry.inode, reason);
                continue;
            }
            if depth > options.max_depth {
                report.abandon(
                    path,
                    entry.inode,
                    AbandonReason::DepthLimit {
                        max_depth: options.max_depth,
                    },
                );
                continue;
            }
            match self.scan_dir_inode(cx, entry.inode, &child) {
                Ok(scan) => {
                    expanded.insert(entry.inode, path.clone());
                    if let Some(err) = &scan.damage {
                        report.abandon(path.clone(), entry.inode, AbandonReason::from_error(err));
                    }
                    stack.push(DirCursor {
                        inode: entry.inode,
                        path,
                        depth,
                        entries: scan.entries.into_iter(),
                    });
                }
                Err(E2sError::Cancelled) => return Err(E2sError::Cancelled),
                Err(err) => {
                    report.abandon(path, entry.inode, AbandonReason::from_error(&err));
                }
            }
        }

        info!(
            term,
            matches = report.matches.len(),
            abandoned = report.abandoned.len(),
            truncated = report.truncated,
            "search complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OpenOptions;
    use e2s_harness::{BuiltImage, ImageBuilder, ROOT_INO, sample_image};

    fn open(image: BuiltImage) -> Ext2Volume {
        Ext2Volume::from_device(
            &Cx::for_testing(),
            Box::new(image.into_device()),
            &OpenOptions::default(),
        )
        .expect("open volume")
    }

    fn paths(report: &SearchReport) -> Vec<&str> {
        report.matches.iter().map(|m| m.path.as_str()).collect()
    }

    #[test]
    fn join_path_never_doubles_slashes() {
        assert_eq!(join_path("/", "docs"), "/docs");
        assert_eq!(join_path("/docs", "readme.md"), "/docs/readme.md");
    }

    #[test]
    fn finds_single_nested_match() {
        let cx = Cx::for_testing();
        let vol = open(sample_image().expect("sample"));
        let report = vol.search_by_name(&cx, "notes").expect("search");
        assert_eq!(paths(&report), ["/docs/archive/notes.txt"]);
        let m = &report.matches[0];
        assert_eq!(m.size, 38);
        assert_eq!(m.file_type, FileType::Regular);
        assert!(report.abandoned.is_empty());
        assert!(!report.truncated);
    }

    #[test]
    fn matching_ignores_case_and_keeps_disk_order() {
        let cx = Cx::for_testing();
        let vol = open(sample_image().expect("sample"));
        let report = vol.search_by_name(&cx, "README").expect("search");
        assert_eq!(paths(&report), ["/docs/readme.md", "/readme-link"]);
        assert_eq!(report.matches[1].file_type, FileType::Symlink);
    }

    #[test]
    fn directory_match_precedes_its_contents() {
        let mut b = ImageBuilder::new();
        let logs = b.mkdir(ROOT_INO, "logs");
        b.file(logs, "logs-1.txt", 1);
        b.file(ROOT_INO, "logs-2.txt", 1);
        let cx = Cx::for_testing();
        let vol = open(b.build().expect("build"));
        let report = vol.search_by_name(&cx, "logs").expect("search");
        assert_eq!(paths(&report), ["/logs", "/logs/logs-1.txt", "/logs-2.txt"]);
        assert_eq!(report.matches[0].file_type, FileType::Directory);
    }

    #[test]
    fn dot_entries_never_match() {
        let cx = Cx::for_testing();
        let vol = open(sample_image().expect("sample"));
        let report = vol.search_by_name(&cx, ".").expect("search");
        assert!(report.matches.iter().all(|m| !m.path.ends_with("/.")));
        assert!(report.matches.iter().all(|m| !m.path.ends_with("/..")));
        assert_eq!(
            paths(&report),
            ["/docs/archive/notes.txt", "/docs/readme.md", "/media/photo.raw", "/report.txt"]
        );
    }

    #[test]
    fn repeated_searches_agree() {
        let cx = Cx::for_testing();
        let vol = open(sample_image().expect("sample"));
        let first = vol.search_by_name(&cx, "e").expect("first");
        let second = vol.search_by_name(&cx, "e").expect("second");
        assert_eq!(first, second);
        for m in &first.matches {
            let (ino, _) = vol.resolve_path(&cx, &m.path).expect("round trip");
            assert_eq!(ino, m.inode, "{}", m.path);
        }
    }

    #[test]
    fn empty_term_is_rejected() {
        let cx = Cx::for_testing();
        let vol = open(sample_image().expect("sample"));
        assert!(matches!(
            vol.search_by_name(&cx, ""),
            Err(E2sError::InvalidArgument(_))
        ));
    }

    #[test]
    fn link_to_ancestor_is_not_reentered() {
        let mut b = ImageBuilder::new();
        let a = b.mkdir(ROOT_INO, "loop");
        b.link(a, "back", ROOT_INO);
        b.file(a, "loop.txt", 1);
        let cx = Cx::for_testing();
        let vol = open(b.build().expect("build"));
        let report = vol.search_by_name(&cx, "loop").expect("search");
        assert_eq!(paths(&report), ["/loop", "/loop/loop.txt"]);
        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(report.abandoned[0].path, "/loop/back");
        assert_eq!(report.abandoned[0].inode, InodeNumber::ROOT);
        assert_eq!(report.abandoned[0].reason, AbandonReason::Cycle);
    }

    #[test]
    fn two_links_to_root_stay_linear() {
        let mut b = ImageBuilder::new();
        b.link(ROOT_INO, "x", ROOT_INO);
        b.link(ROOT_INO, "y", ROOT_INO);
        let cx = Cx::for_testing();
        let vol = open(b.build().expect("build"));
        let report = vol.search_by_name(&cx, "x").expect("search");
        assert_eq!(paths(&report), ["/x"]);
        assert_eq!(report.abandoned.len(), 2);
        assert!(
            report
                .abandoned
                .iter()
                .all(|a| a.reason == AbandonReason::Cycle)
        );
    }

    #[test]
    fn shared_directory_is_walked_once() {
        // Every level links its child twice; without the visited set the
        // walk would take 2^levels steps.
        let mut b = ImageBuilder::new();
        let mut parent = ROOT_INO;
        for level in 0..24 {
            let dir = b.mkdir(parent, &format!("l{level}"));
            b.link(parent, &format!("alias{level}"), dir);
            parent = dir;
        }
        b.file(parent, "needle.txt", 1);
        let cx = Cx::for_testing();
        let vol = open(b.build().expect("build"));
        let report = vol.search_by_name(&cx, "needle").expect("search");
        assert_eq!(report.matches.len(), 1);
        assert!(report.matches[0].path.ends_with("/l23/needle.txt"));
        assert_eq!(report.abandoned.len(), 24);
        let first = &report.abandoned[0];
        let deepest: String = (0..23).map(|l| format!("/l{l}")).collect();
        assert_eq!(first.path, format!("{deepest}/alias22"));
        assert!(matches!(
            &first.reason,
            AbandonReason::AlreadyVisited { first_path } if first_path.ends_with("/l22/l23")
        ));
    }

    #[test]
    fn depth_limit_stops_deep_chain() {
        let mut b = ImageBuilder::new();
        let mut parent = ROOT_INO;
        for _ in 0..6 {
            parent = b.mkdir(parent, "d");
        }
        let cx = Cx::for_testing();
        let vol = open(b.build().expect("build"));
        let options = SearchOptions {
            max_depth: 3,
            max_matches: None,
        };
        let report = vol
            .search_with_options(&cx, "d", &options)
            .expect("search");
        // Depth 4 still matches but is not expanded.
        assert_eq!(paths(&report), ["/d", "/d/d", "/d/d/d", "/d/d/d/d"]);
        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(report.abandoned[0].path, "/d/d/d/d");
        assert_eq!(
            report.abandoned[0].reason,
            AbandonReason::DepthLimit { max_depth: 3 }
        );
    }

    #[test]
    fn damaged_second_block_keeps_first_block_entries() {
        let mut b = ImageBuilder::new().inodes_count(256);
        let many = b.mkdir(ROOT_INO, "many");
        for i in 0..120 {
            b.file(many, &format!("entry-{i:04}.log"), 1);
        }
        let mut image = b.build().expect("build");
        assert!(image.layout(many).expect("layout").data_blocks.len() > 1);
        image.set_dir_rec_len_in_block(many, 1, 0, 0);
        let cx = Cx::for_testing();
        let vol = open(image);

        let report = vol.search_by_name(&cx, "entry-0000").expect("search");
        assert_eq!(paths(&report), ["/many/entry-0000.log"]);
        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(report.abandoned[0].path, "/many");
        assert!(matches!(
            report.abandoned[0].reason,
            AbandonReason::Corrupt { .. }
        ));
        let (ino, _) = vol
            .resolve_path(&cx, "/many/entry-0000.log")
            .expect("resolve");
        assert_eq!(ino, report.matches[0].inode);
    }

    #[test]
    fn damaged_root_tail_is_walked_up_to_the_damage() {
        let mut b = ImageBuilder::new().inodes_count(256);
        for i in 0..120 {
            b.file(ROOT_INO, &format!("top-{i:04}.txt"), 1);
        }
        let mut image = b.build().expect("build");
        image.set_dir_rec_len_in_block(ROOT_INO, 1, 0, 0);
        let cx = Cx::for_testing();
        let vol = open(image);
        let report = vol.search_by_name(&cx, "top-0001").expect("search");
        assert_eq!(paths(&report), ["/top-0001.txt"]);
        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(report.abandoned[0].path, "/");
    }

    #[test]
    fn corrupt_subdirectory_is_abandoned() {
        let mut image = sample_image().expect("sample");
        let vol = open(image.clone());
        let cx = Cx::for_testing();
        let archive = vol.resolve_path(&cx, "/docs/archive").expect("archive").0;
        image.set_dir_rec_len(u32::try_from(archive.0).expect("ino"), 0, 0);
        let vol = open(image);

        let report = vol.search_by_name(&cx, "e").expect("search");
        assert!(paths(&report).contains(&"/docs/archive"));
        assert!(paths(&report).contains(&"/docs/readme.md"));
        assert!(paths(&report).contains(&"/report.txt"));
        assert!(!paths(&report).contains(&"/docs/archive/notes.txt"));
        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(report.abandoned[0].path, "/docs/archive");
        assert!(matches!(
            report.abandoned[0].reason,
            AbandonReason::Corrupt { .. }
        ));
    }

    #[test]
    fn corrupt_root_fails_the_search() {
        let mut image = sample_image().expect("sample");
        image.set_dir_rec_len(ROOT_INO, 0, 0);
        let cx = Cx::for_testing();
        let vol = open(image);
        assert!(matches!(
            vol.search_by_name(&cx, "x"),
            Err(E2sError::CorruptDirectory { .. })
        ));
    }

    #[test]
    fn unreadable_child_inode_is_abandoned() {
        let mut b = ImageBuilder::new();
        b.link(ROOT_INO, "ghost", 4096);
        b.file(ROOT_INO, "ghostly.txt", 1);
        let cx = Cx::for_testing();
        let vol = open(b.build().expect("build"));
        let report = vol.search_by_name(&cx, "ghost").expect("search");
        assert_eq!(paths(&report), ["/ghostly.txt"]);
        assert_eq!(report.abandoned.len(), 1);
        assert!(matches!(
            report.abandoned[0].reason,
            AbandonReason::Unreadable { .. }
        ));
    }

    #[test]
    fn max_matches_truncates() {
        let cx = Cx::for_testing();
        let vol = open(sample_image().expect("sample"));
        let options = SearchOptions {
            max_matches: Some(2),
            ..SearchOptions::default()
        };
        let report = vol
            .search_with_options(&cx, "e", &options)
            .expect("search");
        assert_eq!(report.matches.len(), 2);
        assert!(report.truncated);
    }

    #[test]
    fn cancellation_interrupts_walk() {
        let vol = open(sample_image().expect("sample"));
        let cx = Cx::for_request_with_budget(3);
        assert!(matches!(
            vol.search_by_name(&cx, "notes"),
            Err(E2sError::Cancelled)
        ));
    }

    #[test]
    fn report_serializes_with_tagged_reasons() {
        let report = SearchReport {
            term: "x".to_owned(),
            matches: Vec::new(),
            abandoned: vec![AbandonedBranch {
                path: "/deep".to_owned(),
                inode: InodeNumber(12),
                reason: AbandonReason::DepthLimit { max_depth: 3 },
            }, AbandonedBranch {
                path: "/deep/up".to_owned(),
                inode: InodeNumber(2),
                reason: AbandonReason::Cycle,
            }],
            truncated: false,
        };
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["abandoned"][0]["reason"]["kind"], "depth_limit");
        assert_eq!(json["abandoned"][0]["reason"]["max_depth"], 3);
        assert_eq!(json["abandoned"][1]["reason"]["kind"], "cycle");
    }
}
