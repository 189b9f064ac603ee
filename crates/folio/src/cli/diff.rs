//! `folio diff`: print the delta batch between two block lists.

use std::path::Path;

use folio_core::block::{Block, DeltaBlock, diff_blocks};
use folio_core::error::Result;

use super::util::{print_json, read_json};

pub fn handle_diff(previous: &Path, current: &Path) -> Result<()> {
    let deltas = compute(&read_json::<Vec<Block>>(previous)?, &read_json::<Vec<Block>>(current)?);
    log::info!("{} deltas", deltas.len());
    print_json(&deltas)
}

fn compute(previous: &[Block], current: &[Block]) -> Vec<DeltaBlock> {
    diff_blocks(previous, current)
}
