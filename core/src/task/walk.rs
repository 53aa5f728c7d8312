//! Iterative depth-first traversal over `depend` edges.
//!
//! Every graph query shares this walk. It keeps an explicit stack of
//! `(task, next dependency index)` frames instead of recursing, so deep chains
//! cannot overflow the call stack. A task that is already on the stack is
//! never descended into again, which makes the walk terminate on cyclic
//! graphs; fully explored tasks are skipped as well.

use std::collections::HashSet;

use super::graph::Arena;
use super::id::TaskId;
use super::node::Node;
use crate::error::GraphError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// How the walk classifies the far end of a `depend` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Edge {
    /// Not seen yet; the walk descends into it next.
    Fresh,
    /// Currently on the stack (a back edge, i.e. a cycle).
    OnStack,
    /// Already fully explored.
    Done,
}

struct Frame {
    id: TaskId,
    cursor: usize,
}

/// Walk from `start`, calling `on_edge(from, to, kind)` for every edge taken
/// and `on_leave(task, node)` once a task's dependencies are exhausted.
///
/// Returns `Ok(true)` if a callback stopped the walk early.
pub(crate) fn walk<E, L>(
    arena: &Arena,
    start: TaskId,
    mut on_edge: E,
    mut on_leave: L,
) -> Result<bool, GraphError>
where
    E: FnMut(TaskId, TaskId, Edge) -> Flow,
    L: FnMut(TaskId, &Node) -> Flow,
{
    arena.node(start)?;

    let mut stack = vec![Frame {
        id: start,
        cursor: 0,
    }];
    let mut on_stack: HashSet<TaskId> = HashSet::from([start]);
    let mut done: HashSet<TaskId> = HashSet::new();

    while let Some(top) = stack.last_mut() {
        let current = top.id;
        let node = arena.node(current)?;

        if let Some(&dep) = node.depend.get(top.cursor) {
            top.cursor += 1;

            let kind = if on_stack.contains(&dep) {
                Edge::OnStack
            } else if done.contains(&dep) {
                Edge::Done
            } else {
                Edge::Fresh
            };

            if on_edge(current, dep, kind) == Flow::Stop {
                return Ok(true);
            }

            if kind == Edge::Fresh {
                arena.node(dep)?;
                on_stack.insert(dep);
                stack.push(Frame { id: dep, cursor: 0 });
            }
        } else {
            stack.pop();
            on_stack.remove(&current);
            done.insert(current);

            if on_leave(current, node) == Flow::Stop {
                return Ok(true);
            }
        }
    }

    Ok(false)
}

/// Every task reachable from `start` (inclusive), in post-order.
pub(crate) fn collect(arena: &Arena, start: TaskId) -> Result<Vec<TaskId>, GraphError> {
    let mut order = Vec::new();
    walk(
        arena,
        start,
        |_, _, _| Flow::Continue,
        |id, _| {
            order.push(id);
            Flow::Continue
        },
    )?;
    Ok(order)
}

#[derive(Clone, Copy)]
struct Mark {
    index: usize,
    low: usize,
    on_stack: bool,
}

/// Every task lying on at least one cycle, i.e. in a strongly connected
/// component of two or more tasks (self edges are never stored).
///
/// Iterative Tarjan over the whole arena, using the same frame stack as
/// [`walk`].
pub(crate) fn cyclic_tasks(arena: &Arena) -> HashSet<TaskId> {
    let mut marks: Vec<Option<Mark>> = vec![None; arena.slot_count()];
    let mut component: Vec<TaskId> = Vec::new();
    let mut cyclic = HashSet::new();
    let mut counter = 0;

    for root in arena.ids() {
        if marks[root.index()].is_some() {
            continue;
        }
        marks[root.index()] = Some(Mark {
            index: counter,
            low: counter,
            on_stack: true,
        });
        counter += 1;
        component.push(root);
        let mut stack = vec![Frame { id: root, cursor: 0 }];

        while let Some(top) = stack.last_mut() {
            let current = top.id;
            let Ok(node) = arena.node(current) else {
                stack.pop();
                continue;
            };

            if let Some(&dep) = node.depend.get(top.cursor) {
                top.cursor += 1;
                match marks[dep.index()] {
                    None => {
                        marks[dep.index()] = Some(Mark {
                            index: counter,
                            low: counter,
                            on_stack: true,
                        });
                        counter += 1;
                        component.push(dep);
                        stack.push(Frame { id: dep, cursor: 0 });
                    }
                    Some(seen) if seen.on_stack => {
                        if let Some(mark) = marks[current.index()].as_mut() {
                            mark.low = mark.low.min(seen.index);
                        }
                    }
                    Some(_) => {}
                }
                continue;
            }

            stack.pop();
            let Some(mark) = marks[current.index()] else {
                continue;
            };
            if let Some(parent) = stack.last() {
                if let Some(up) = marks[parent.id.index()].as_mut() {
                    up.low = up.low.min(mark.low);
                }
            }
            if mark.low == mark.index {
                let mut members = Vec::new();
                while let Some(member) = component.pop() {
                    if let Some(m) = marks[member.index()].as_mut() {
                        m.on_stack = false;
                    }
                    members.push(member);
                    if member == current {
                        break;
                    }
                }
                if members.len() > 1 {
                    cyclic.extend(members);
                }
            }
        }
    }

    cyclic
}
