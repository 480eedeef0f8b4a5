//! Joining cabinets into sets and splicing split folders.
//!
//! `append` and `prepend` are both a single merge of a left and a right
//! cabinet.  When the boundary folders carry merge anchors on both sides,
//! the right folder is spliced into the left one: its data segments are
//! appended, its duplicate boundary file records are dropped, and the
//! surviving records are re-pointed at the merged lists.  The resulting
//! [`Cabinet`] value owns the whole chain, so every former member sees
//! the same merged folder and file lists.

use crate::cabinet::Cabinet;
use crate::error::{Error, Result};
use crate::system::System;

/// Merge `right` onto the end of `left`.  On failure both cabinets are
/// returned untouched.
pub(crate) fn merge(
    sys: &dyn System,
    left: Cabinet,
    right: Cabinet,
) -> std::result::Result<Cabinet, (Cabinet, Cabinet, Error)> {
    match check(sys, &left, &right) {
        Ok(()) => Ok(commit(left, right)),
        Err(error) => Err((left, right, error)),
    }
}

/// All validation, before anything is mutated.
fn check(sys: &dyn System, left: &Cabinet, right: &Cabinet) -> Result<()> {
    let left_tail = left.parts.last().unwrap();
    let right_head = right.parts.first().unwrap();
    if left_tail.set_id != right_head.set_id {
        sys.message(None, "WARNING; merged cabinets with differing set IDs");
    }
    if left_tail.set_index > right_head.set_index {
        sys.message(None, "WARNING; merged cabinets with odd order");
    }

    let left_folder = left.folders.last().unwrap();
    let right_folder = right.folders.first().unwrap();
    match (left_folder.merge_next, right_folder.merge_prev) {
        // Neither boundary folder is split; nothing further to prove.
        (None, None) => Ok(()),
        (Some(left_anchor), Some(right_anchor)) => {
            if left_folder.comp_bits != right_folder.comp_bits {
                data_format!(
                    "split folder compression mismatch (0x{:04x} vs 0x{:04x})",
                    left_folder.comp_bits,
                    right_folder.comp_bits
                );
            }
            // The files continuing over the boundary must appear in both
            // cabinets, in order, at the same folder offsets.
            let left_chain = &left.files[left_anchor..];
            for (i, left_file) in left_chain.iter().enumerate() {
                match right.files.get(right_anchor + i) {
                    Some(right_file)
                        if right_file.offset == left_file.offset => {}
                    _ => {
                        tracing::debug!(
                            file = %left_file.name,
                            "merge chain mismatch"
                        );
                        data_format!("split folder file lists do not match");
                    }
                }
            }
            Ok(())
        }
        _ => data_format!("only one of the two cabinets has a split folder"),
    }
}

fn commit(mut left: Cabinet, mut right: Cabinet) -> Cabinet {
    let part_base = left.parts.len();
    let folder_base = left.folders.len();
    let merging = left.folders.last().unwrap().merge_next.is_some();

    left.parts.append(&mut right.parts);

    // Splice the right boundary folder into the left one.
    let mut spliced = None;
    if merging {
        let right_folder = right.folders.remove(0);
        let left_folder = left.folders.last_mut().unwrap();
        for (i, segment) in right_folder.data.iter().enumerate() {
            let mut segment = segment.clone();
            segment.part += part_base;
            // The block split across the boundary is counted by both
            // sides; the continuation side loses it.
            if i == 0 {
                segment.num_blocks = segment.num_blocks.saturating_sub(1);
            }
            left_folder.data.push(segment);
        }
        left_folder.num_blocks = (left_folder.num_blocks
            + right_folder.num_blocks)
            .saturating_sub(1);
        spliced = Some(right_folder);
    }

    // Remap the remaining right-hand folders and their data segments.
    let folder_shift = |index: usize| {
        folder_base + index - if merging { 1 } else { 0 }
    };
    for folder in &mut right.folders {
        for segment in &mut folder.data {
            segment.part += part_base;
        }
    }

    // Duplicate records of the straddling files are dropped: they are
    // exactly the right-hand files that point at the spliced folder.
    let file_base = left.files.len();
    let mut file_map = vec![None; right.files.len()];
    let mut kept = Vec::with_capacity(right.files.len());
    for (index, mut file) in right.files.drain(..).enumerate() {
        if merging && file.folder == 0 {
            continue;
        }
        file.folder = folder_shift(file.folder);
        file_map[index] = Some(file_base + kept.len());
        kept.push(file);
    }

    // Surviving right-hand anchors move with their files.
    for folder in &mut right.folders {
        folder.merge_prev =
            folder.merge_prev.and_then(|anchor| file_map[anchor]);
        folder.merge_next =
            folder.merge_next.and_then(|anchor| file_map[anchor]);
    }
    if let Some(spliced) = spliced {
        // The merged folder adopts the right side's continuation anchor,
        // except when that anchor's record belonged to the spliced folder
        // itself (a file continued both ways): that record is gone, and
        // the left side's anchor already names the same files.
        let left_folder = left.folders.last_mut().unwrap();
        match spliced.merge_next {
            Some(anchor) if file_map[anchor].is_none() => {}
            adopted => {
                left_folder.merge_next =
                    adopted.and_then(|anchor| file_map[anchor]);
            }
        }
    }

    left.folders.append(&mut right.folders);
    left.files.extend(kept);
    left
}
