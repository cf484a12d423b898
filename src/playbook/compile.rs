//! Compiling a play into the block list the iterator walks.
//!
//! Compilation applies the run's tag filter to every task leaf. Blocks left
//! without any task are dropped, except the fact gathering block which always
//! stays at index 0 so the iterator's setup phase has a fixed position.

use std::sync::Arc;

use super::{EntityId, Playbook, Resolve, TaskItem};
use crate::tags::TagFilter;

/// One item of a compiled task list.
#[derive(Debug, Clone)]
pub enum CompiledItem {
    Task(EntityId),
    Block(Arc<CompiledBlock>),
}

/// A block with its task lists filtered and nested blocks compiled.
#[derive(Debug, Clone, Default)]
pub struct CompiledBlock {
    /// Arena handle of the source block, if any
    pub id: Option<EntityId>,
    pub block: Vec<CompiledItem>,
    pub rescue: Vec<CompiledItem>,
    pub always: Vec<CompiledItem>,
}

impl CompiledBlock {
    /// A block holding only the given tasks.
    pub fn from_tasks(tasks: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            id: None,
            block: tasks.into_iter().map(CompiledItem::Task).collect(),
            ..Self::default()
        }
    }

    pub fn has_tasks(&self) -> bool {
        !(self.block.is_empty() && self.rescue.is_empty() && self.always.is_empty())
    }

    /// The first task of the main list, used for the setup block.
    pub fn first_task(&self) -> Option<EntityId> {
        match self.block.first() {
            Some(CompiledItem::Task(id)) => Some(*id),
            _ => None,
        }
    }

    /// Every task leaf in block, rescue, always order.
    pub fn tasks(&self) -> Vec<EntityId> {
        let mut out = Vec::new();
        collect(&self.block, &mut out);
        collect(&self.rescue, &mut out);
        collect(&self.always, &mut out);
        out
    }
}

fn collect(items: &[CompiledItem], out: &mut Vec<EntityId>) {
    for item in items {
        match item {
            CompiledItem::Task(id) => out.push(*id),
            CompiledItem::Block(block) => out.extend(block.tasks()),
        }
    }
}

/// Compile a play's top-level blocks: setup, pre_tasks, tasks, post_tasks.
pub fn compile_play(book: &Playbook, play: EntityId, filter: &TagFilter) -> Vec<Arc<CompiledBlock>> {
    let mut out = Vec::new();
    for (index, block) in book.play_blocks(play).into_iter().enumerate() {
        let compiled = compile_block(book, block, filter);
        if index == 0 || compiled.has_tasks() {
            out.push(Arc::new(compiled));
        }
    }
    out
}

/// Handler tasks of a play, flattened in definition order.
pub fn compile_handlers(book: &Playbook, play: EntityId) -> Vec<EntityId> {
    let mut out = Vec::new();
    for block in book.handler_blocks(play) {
        book.collect_tasks(*block, &mut out);
    }
    out
}

fn compile_block(book: &Playbook, id: EntityId, filter: &TagFilter) -> CompiledBlock {
    let Some((main, rescue, always)) = book.block_lists(id) else {
        return CompiledBlock::default();
    };
    CompiledBlock {
        id: Some(id),
        block: compile_items(book, main, filter),
        rescue: compile_items(book, rescue, filter),
        always: compile_items(book, always, filter),
    }
}

fn compile_items(book: &Playbook, items: &[TaskItem], filter: &TagFilter) -> Vec<CompiledItem> {
    items
        .iter()
        .filter_map(|item| match *item {
            TaskItem::Task(task) => {
                let tags = book.entity_ref(task).get_string_list("tags");
                filter.should_run(&tags).then_some(CompiledItem::Task(task))
            }
            TaskItem::Block(block) => {
                let compiled = compile_block(book, block, filter);
                compiled
                    .has_tasks()
                    .then(|| CompiledItem::Block(Arc::new(compiled)))
            }
        })
        .collect()
}
