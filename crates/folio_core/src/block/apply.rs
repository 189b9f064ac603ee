use indexmap::IndexMap;

use super::{Block, DeltaAction, DeltaBlock};
use crate::error::{FolioError, Result};

/// Apply a delta list to a block list and return the patched, order-sorted
/// result.
///
/// Every touched block is stamped with its delta's `date`. A `Create` for an
/// existing id replaces the block. An `Update` for an unknown id is skipped.
pub fn apply_deltas(blocks: Vec<Block>, deltas: &[DeltaBlock]) -> Result<Vec<Block>> {
    let mut by_id: IndexMap<String, Block> =
        blocks.into_iter().map(|b| (b.id.clone(), b)).collect();

    for delta in deltas {
        match delta.action {
            DeltaAction::Create => {
                let content = delta.content.clone().ok_or_else(|| FolioError::InvalidDelta {
                    id: delta.id.clone(),
                    reason: "create without content".to_string(),
                })?;
                let block_type = delta.block_type.ok_or_else(|| FolioError::InvalidDelta {
                    id: delta.id.clone(),
                    reason: "create without blockType".to_string(),
                })?;
                let order = delta.order.unwrap_or_else(|| next_order(&by_id));

                let block = Block {
                    id: delta.id.clone(),
                    order,
                    block_type,
                    content,
                    attr: delta.attr.clone().unwrap_or_default(),
                    updated_at: Some(delta.date),
                };
                by_id.insert(delta.id.clone(), block);
            }
            DeltaAction::Update => {
                let Some(block) = by_id.get_mut(&delta.id) else {
                    log::warn!("[Blocks] Update for unknown block '{}' ignored", delta.id);
                    continue;
                };
                if let Some(content) = &delta.content {
                    block.content = content.clone();
                }
                if let Some(block_type) = delta.block_type {
                    block.block_type = block_type;
                }
                if let Some(attr) = &delta.attr {
                    block.attr = attr.clone();
                }
                if let Some(order) = delta.order {
                    block.order = order;
                }
                if delta.has_changes() {
                    block.updated_at = Some(delta.date);
                }
            }
            DeltaAction::Delete => {
                by_id.shift_remove(&delta.id);
            }
        }
    }

    let mut result: Vec<Block> = by_id.into_values().collect();
    result.sort_by(|a, b| a.order.total_cmp(&b.order));
    Ok(result)
}

fn next_order(blocks: &IndexMap<String, Block>) -> f64 {
    blocks
        .values()
        .map(|b| b.order)
        .fold(None, |max: Option<f64>, o| Some(max.map_or(o, |m| m.max(o))))
        .map_or(0.0, |m| m + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockType, diff_blocks, text_node};

    #[test]
    fn test_apply_diff_reproduces_current() {
        let previous = vec![
            Block::text("a", 0.0, "A"),
            Block::text("b", 1.0, "B"),
            Block::text("c", 2.0, "C"),
        ];
        let mut current = vec![
            Block::text("c", 0.0, "C"),
            Block::text("a", 1.0, "A, edited"),
            Block::text("d", 2.0, "D"),
        ];
        current[2].block_type = BlockType::Comment;

        let deltas = diff_blocks(&previous, &current);
        let applied = apply_deltas(previous, &deltas).unwrap();

        let ids: Vec<_> = applied.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "d"]);
        assert_eq!(applied[1].content, vec![text_node("A, edited")]);
        assert_eq!(applied[2].block_type, BlockType::Comment);
        assert!(applied.iter().all(|b| b.updated_at.is_some()));
    }

    #[test]
    fn test_create_without_content_is_rejected() {
        let mut delta = DeltaBlock::bare("x", DeltaAction::Create, chrono::Utc::now());
        delta.block_type = Some(BlockType::Paragraph);

        let err = apply_deltas(vec![], &[delta]).unwrap_err();
        assert!(matches!(err, FolioError::InvalidDelta { .. }));
    }

    #[test]
    fn test_create_without_order_appends() {
        let mut delta = DeltaBlock::bare("x", DeltaAction::Create, chrono::Utc::now());
        delta.block_type = Some(BlockType::Paragraph);
        delta.content = Some(vec![]);

        let blocks = vec![Block::text("a", 0.0, "A"), Block::text("b", 4.0, "B")];
        let applied = apply_deltas(blocks, &[delta]).unwrap();
        assert_eq!(applied.last().unwrap().id, "x");
        assert_eq!(applied.last().unwrap().order, 5.0);
    }

    #[test]
    fn test_update_unknown_id_is_ignored() {
        let mut delta = DeltaBlock::bare("ghost", DeltaAction::Update, chrono::Utc::now());
        delta.order = Some(3.0);

        let blocks = vec![Block::text("a", 0.0, "A")];
        let applied = apply_deltas(blocks.clone(), &[delta]).unwrap();
        assert_eq!(applied, blocks);
    }
}
