use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use super::{Block, DeltaAction, DeltaBlock};

/// Compute the field-level patch that turns `previous` into `current`.
///
/// Creates and updates come in `current` order, followed by deletes in
/// `previous` order. Order is positional: a block's `order` delta is its new
/// index, emitted only when that index differs from its index in `previous`.
pub fn diff_blocks(previous: &[Block], current: &[Block]) -> Vec<DeltaBlock> {
    diff_blocks_at(previous, current, Utc::now())
}

/// [`diff_blocks`] with an explicit delta date.
pub fn diff_blocks_at(
    previous: &[Block],
    current: &[Block],
    date: DateTime<Utc>,
) -> Vec<DeltaBlock> {
    let prev_index: HashMap<&str, (usize, &Block)> = previous
        .iter()
        .enumerate()
        .map(|(i, b)| (b.id.as_str(), (i, b)))
        .collect();

    let mut seen: HashSet<&str> = HashSet::with_capacity(current.len());
    let mut deltas = Vec::new();

    for (i, block) in current.iter().enumerate() {
        seen.insert(block.id.as_str());

        let Some(&(prev_pos, prev)) = prev_index.get(block.id.as_str()) else {
            deltas.push(DeltaBlock {
                content: Some(block.content.clone()),
                block_type: Some(block.block_type),
                attr: Some(block.attr.clone()),
                order: Some(i as f64),
                ..DeltaBlock::bare(&block.id, DeltaAction::Create, date)
            });
            continue;
        };

        let mut delta = DeltaBlock::bare(&block.id, DeltaAction::Update, date);
        if block.content != prev.content {
            delta.content = Some(block.content.clone());
        }
        if block.block_type != prev.block_type {
            delta.block_type = Some(block.block_type);
        }
        if block.attr != prev.attr {
            delta.attr = Some(block.attr.clone());
        }
        if i != prev_pos {
            delta.order = Some(i as f64);
        }

        if delta.has_changes() {
            deltas.push(delta);
        }
    }

    for block in previous {
        if !seen.contains(block.id.as_str()) {
            deltas.push(DeltaBlock::bare(&block.id, DeltaAction::Delete, date));
        }
    }

    deltas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockType, text_node};

    fn doc() -> Vec<Block> {
        vec![
            Block::text("a", 0.0, "A"),
            Block::text("b", 1.0, "B"),
            Block::with_id("c", BlockType::Divider, 2.0, vec![]),
        ]
    }

    #[test]
    fn test_unchanged_pair_is_empty() {
        let blocks = doc();
        assert!(diff_blocks(&blocks, &blocks).is_empty());
        assert!(diff_blocks(&[], &[]).is_empty());
    }

    #[test]
    fn test_append_emits_create() {
        let previous = vec![Block::text("a", 0.0, "A")];
        let mut current = previous.clone();
        current.push(Block::text("b", 1.0, "B"));

        let deltas = diff_blocks(&previous, &current);

        assert_eq!(deltas.len(), 1);
        let delta = &deltas[0];
        assert_eq!(delta.id, "b");
        assert_eq!(delta.action, DeltaAction::Create);
        assert_eq!(delta.content, Some(vec![text_node("B")]));
        assert_eq!(delta.block_type, Some(BlockType::Describe));
        assert_eq!(delta.order, Some(1.0));
    }

    #[test]
    fn test_content_only_change() {
        let previous = doc();
        let mut current = doc();
        current[1].content = vec![text_node("B, revised")];

        let deltas = diff_blocks(&previous, &current);

        assert_eq!(deltas.len(), 1);
        let delta = &deltas[0];
        assert_eq!(delta.id, "b");
        assert_eq!(delta.action, DeltaAction::Update);
        assert_eq!(delta.content, Some(vec![text_node("B, revised")]));
        assert!(delta.block_type.is_none());
        assert!(delta.attr.is_none());
        assert!(delta.order.is_none());
    }

    #[test]
    fn test_type_and_attr_changes_carry_only_those_fields() {
        let previous = doc();
        let mut current = doc();
        current[0].block_type = BlockType::Dialogue;
        current[2] = current[2].clone().with_attr("style", "stars");

        let deltas = diff_blocks(&previous, &current);

        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].block_type, Some(BlockType::Dialogue));
        assert!(deltas[0].content.is_none());
        assert_eq!(deltas[1].id, "c");
        assert_eq!(deltas[1].attr.as_ref().unwrap()["style"], "stars");
        assert!(deltas[1].content.is_none());
    }

    #[test]
    fn test_reorder_emits_order_only_updates() {
        let previous = doc();
        let current = vec![previous[1].clone(), previous[0].clone(), previous[2].clone()];

        let deltas = diff_blocks(&previous, &current);

        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].id, "b");
        assert_eq!(deltas[0].order, Some(0.0));
        assert_eq!(deltas[1].id, "a");
        assert_eq!(deltas[1].order, Some(1.0));
        assert!(deltas.iter().all(|d| d.content.is_none()));
    }

    #[test]
    fn test_removed_blocks_emit_delete_after_updates() {
        let previous = doc();
        let mut current = vec![previous[0].clone(), previous[2].clone()];
        current[0].content = vec![text_node("A2")];

        let deltas = diff_blocks(&previous, &current);
        let actions: Vec<_> = deltas.iter().map(|d| (d.id.as_str(), d.action)).collect();

        // "c" moved from index 2 to 1
        assert_eq!(
            actions,
            vec![
                ("a", DeltaAction::Update),
                ("c", DeltaAction::Update),
                ("b", DeltaAction::Delete),
            ]
        );
        assert!(!deltas[2].has_changes());
    }

    #[test]
    fn test_deltas_share_the_given_date() {
        let date = "2024-05-01T10:00:00Z".parse().unwrap();
        let deltas = diff_blocks_at(&[], &doc(), date);
        assert_eq!(deltas.len(), 3);
        assert!(deltas.iter().all(|d| d.date == date));
    }
}
