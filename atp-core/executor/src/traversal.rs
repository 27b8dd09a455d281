//! 组件树遍历
//!
//! 遍历以两阶段访问事件表示: 实体产生 `Enter` 与 `Exit` 两个事件，
//! 叶子组件产生一个 `Leaf` 事件。已禁用的组件连同其子树不产生任何事件。

use crate::component::Component;

/// 相对遍历根的子组件索引路径
pub type NodePath = Vec<usize>;

/// 遍历事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visit {
    /// 进入实体 (前序)
    Enter(NodePath),

    /// 叶子组件
    Leaf(NodePath),

    /// 离开实体 (后序)，其全部已启用后代均已产生事件
    Exit(NodePath),
}

impl Visit {
    pub fn path(&self) -> &NodePath {
        match self {
            Visit::Enter(path) | Visit::Leaf(path) | Visit::Exit(path) => path,
        }
    }
}

#[derive(Debug)]
struct Frame {
    path: NodePath,
    next_child: usize,
}

/// 遍历游标
///
/// 游标在两次调用之间不持有树的借用，调用方可以在事件之间修改当前节点。
/// 遍历期间不得增删节点。
#[derive(Debug)]
pub struct TraversalCursor {
    stack: Vec<Frame>,
}

impl Default for TraversalCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl TraversalCursor {
    /// 从根的子组件开始遍历，根本身不产生事件
    pub fn new() -> Self {
        Self {
            stack: vec![Frame {
                path: NodePath::new(),
                next_child: 0,
            }],
        }
    }

    /// 当前打开的实体深度 (不含根)
    pub fn depth(&self) -> usize {
        self.stack.len().saturating_sub(1)
    }

    /// 产生下一个事件
    pub fn next(&mut self, root: &Component) -> Option<Visit> {
        loop {
            let frame = self.stack.last_mut()?;
            let Some(parent) = root.node_at(&frame.path) else {
                self.stack.clear();
                return None;
            };

            let index = frame.next_child;
            if let Some(child) = parent.children().get(index) {
                frame.next_child += 1;
                if !child.is_enabled() {
                    continue;
                }

                let mut path = frame.path.clone();
                path.push(index);
                if child.is_entity() {
                    self.stack.push(Frame {
                        path: path.clone(),
                        next_child: 0,
                    });
                    return Some(Visit::Enter(path));
                }
                return Some(Visit::Leaf(path));
            }

            let finished = self.stack.pop()?;
            if self.stack.is_empty() {
                return None;
            }
            return Some(Visit::Exit(finished.path));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Actor;
    use crate::context::EntityManager;

    struct Noop;

    impl Actor for Noop {
        fn act(&mut self, _ctx: &EntityManager) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_entities_are_visited_twice() {
        let root = Component::entity("root")
            .with_child(Component::actor("a", Noop))
            .with_child(
                Component::entity("e")
                    .with_child(Component::actor("b", Noop))
                    .with_child(Component::entity("empty")),
            )
            .with_child(Component::actor("c", Noop));

        assert_eq!(
            root.visits(),
            vec![
                Visit::Leaf(vec![0]),
                Visit::Enter(vec![1]),
                Visit::Leaf(vec![1, 0]),
                Visit::Enter(vec![1, 1]),
                Visit::Exit(vec![1, 1]),
                Visit::Exit(vec![1]),
                Visit::Leaf(vec![2]),
            ]
        );
    }

    #[test]
    fn test_disabled_subtree_is_invisible() {
        let root = Component::entity("root")
            .with_child(
                Component::entity("off")
                    .with_child(Component::actor("hidden", Noop))
                    .disabled(),
            )
            .with_child(Component::actor("off-leaf", Noop).disabled())
            .with_child(Component::actor("on", Noop));

        assert_eq!(root.visits(), vec![Visit::Leaf(vec![2])]);
    }

    #[test]
    fn test_sibling_entities_with_same_name_are_distinct() {
        let root = Component::entity("root")
            .with_child(Component::entity("step"))
            .with_child(Component::entity("step"));

        assert_eq!(
            root.visits(),
            vec![
                Visit::Enter(vec![0]),
                Visit::Exit(vec![0]),
                Visit::Enter(vec![1]),
                Visit::Exit(vec![1]),
            ]
        );
    }

    #[test]
    fn test_cursor_depth_and_empty_root() {
        let root = Component::entity("root").with_child(
            Component::entity("outer").with_child(Component::entity("inner")),
        );
        let mut cursor = TraversalCursor::new();
        assert_eq!(cursor.next(&root), Some(Visit::Enter(vec![0])));
        assert_eq!(cursor.next(&root), Some(Visit::Enter(vec![0, 0])));
        assert_eq!(cursor.depth(), 2);
        assert_eq!(cursor.next(&root), Some(Visit::Exit(vec![0, 0])));
        assert_eq!(cursor.next(&root), Some(Visit::Exit(vec![0])));
        assert_eq!(cursor.next(&root), None);
        assert_eq!(cursor.next(&root), None);

        assert!(Component::entity("empty").visits().is_empty());
    }
}
