//! Scene graph capability
//!
//! The engine needs very little from a scene graph: local matrices, a
//! visibility flag, parent links, a way to refresh world matrices, and a
//! reparenting operation that keeps a node where it is in world space.
//! [`SceneGraph`] names exactly that; [`Scene`] is a small arena
//! implementation used by the runtime and the tests.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::math::Transform;

/// Index of a node inside a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

pub trait SceneGraph {
    fn root(&self) -> NodeId;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    fn local_matrix(&self, node: NodeId) -> Matrix4<f32>;

    fn set_local_matrix(&mut self, node: NodeId, matrix: Matrix4<f32>);

    fn is_visible(&self, node: NodeId) -> bool;

    fn set_visible(&mut self, node: NodeId, visible: bool);

    /// World matrix as of the last update
    fn world_matrix(&self, node: NodeId) -> Matrix4<f32>;

    /// Recompute the world matrix of `node` and its descendants
    fn update_world_matrix(&mut self, node: NodeId);

    /// Reparent `node` under `new_parent` keeping its world transform
    fn attach(&mut self, node: NodeId, new_parent: NodeId);

    fn local_transform(&self, node: NodeId) -> Transform {
        Transform::from_matrix(&self.local_matrix(node))
    }

    fn set_local_transform(&mut self, node: NodeId, transform: &Transform) {
        self.set_local_matrix(node, transform.to_matrix());
    }

    /// Freshly computed world transform of `node`
    fn world_transform(&mut self, node: NodeId) -> Transform {
        self.update_world_matrix(node);
        Transform::from_matrix(&self.world_matrix(node))
    }

    /// Place `node` at `world` by converting into its parent's space
    fn set_world_transform(&mut self, node: NodeId, world: &Transform) {
        let parent_world = match self.parent(node) {
            Some(parent) => {
                self.update_world_matrix(parent);
                self.world_matrix(parent)
            }
            None => Matrix4::identity(),
        };
        let local = parent_world
            .try_inverse()
            .map(|inverse| inverse * world.to_matrix())
            .unwrap_or_else(|| world.to_matrix());
        self.set_local_matrix(node, local);
        self.update_world_matrix(node);
    }
}

#[derive(Debug, Clone)]
struct SceneNode {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    local: Matrix4<f32>,
    world: Matrix4<f32>,
    visible: bool,
}

/// Arena scene graph. Node 0 is the root and never moves.
#[derive(Debug, Clone)]
pub struct Scene {
    nodes: Vec<SceneNode>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            nodes: vec![SceneNode {
                name: "root".to_string(),
                parent: None,
                children: Vec::new(),
                local: Matrix4::identity(),
                world: Matrix4::identity(),
                visible: true,
            }],
        }
    }

    /// Add a node under `parent` with an identity local matrix
    pub fn add_node(&mut self, name: impl Into<String>, parent: NodeId) -> NodeId {
        let id = NodeId(self.nodes.len());
        let world = self.nodes[parent.0].world;
        self.nodes.push(SceneNode {
            name: name.into(),
            parent: Some(parent),
            children: Vec::new(),
            local: Matrix4::identity(),
            world,
            visible: true,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn name(&self, node: NodeId) -> &str {
        &self.nodes[node.0].name
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn detach_from_parent(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent {
            self.nodes[parent.0].children.retain(|child| *child != node);
        }
    }

    /// Move `node` under `new_parent` keeping its local matrix
    pub fn add_child(&mut self, new_parent: NodeId, node: NodeId) {
        self.detach_from_parent(node);
        self.nodes[node.0].parent = Some(new_parent);
        self.nodes[new_parent.0].children.push(node);
        self.update_world_matrix(node);
    }
}

impl SceneGraph for Scene {
    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    fn local_matrix(&self, node: NodeId) -> Matrix4<f32> {
        self.nodes[node.0].local
    }

    fn set_local_matrix(&mut self, node: NodeId, matrix: Matrix4<f32>) {
        self.nodes[node.0].local = matrix;
    }

    fn is_visible(&self, node: NodeId) -> bool {
        self.nodes[node.0].visible
    }

    fn set_visible(&mut self, node: NodeId, visible: bool) {
        self.nodes[node.0].visible = visible;
    }

    fn world_matrix(&self, node: NodeId) -> Matrix4<f32> {
        self.nodes[node.0].world
    }

    fn update_world_matrix(&mut self, node: NodeId) {
        // Ancestors first so the node sees a current parent matrix.
        let mut chain = vec![node];
        let mut cursor = self.nodes[node.0].parent;
        while let Some(parent) = cursor {
            chain.push(parent);
            cursor = self.nodes[parent.0].parent;
        }
        let mut world = Matrix4::identity();
        for id in chain.iter().rev() {
            world *= self.nodes[id.0].local;
            self.nodes[id.0].world = world;
        }

        let mut stack: Vec<NodeId> = self.nodes[node.0].children.clone();
        while let Some(child) = stack.pop() {
            let parent = self.nodes[child.0].parent.unwrap_or(NodeId(0));
            self.nodes[child.0].world = self.nodes[parent.0].world * self.nodes[child.0].local;
            stack.extend(self.nodes[child.0].children.iter().copied());
        }
    }

    fn attach(&mut self, node: NodeId, new_parent: NodeId) {
        self.update_world_matrix(node);
        self.update_world_matrix(new_parent);
        let world = self.nodes[node.0].world;
        let parent_world = self.nodes[new_parent.0].world;
        let local = parent_world
            .try_inverse()
            .map(|inverse| inverse * world)
            .unwrap_or(world);

        self.detach_from_parent(node);
        self.nodes[node.0].parent = Some(new_parent);
        self.nodes[new_parent.0].children.push(node);
        self.nodes[node.0].local = local;
        self.update_world_matrix(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    #[test]
    fn test_world_matrix_follows_parent_chain() {
        let mut scene = Scene::new();
        let rig = scene.add_node("rig", scene.root());
        let child = scene.add_node("child", rig);
        scene.set_local_transform(rig, &Transform::from_position(Vector3::new(1.0, 0.0, 0.0)));
        scene.set_local_transform(child, &Transform::from_position(Vector3::new(0.0, 2.0, 0.0)));

        let world = scene.world_transform(child);
        assert_relative_eq!(world.position, Vector3::new(1.0, 2.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_attach_preserves_world_transform() {
        let mut scene = Scene::new();
        let a = scene.add_node("a", scene.root());
        let b = scene.add_node("b", scene.root());
        let node = scene.add_node("node", a);
        scene.set_local_transform(
            a,
            &Transform::from_parts(
                Vector3::new(0.0, 1.0, 0.0),
                UnitQuaternion::from_euler_angles(0.0, 0.5, 0.0),
                Vector3::repeat(2.0),
            ),
        );
        scene.set_local_transform(b, &Transform::from_position(Vector3::new(-3.0, 0.0, 4.0)));
        scene.set_local_transform(node, &Transform::from_position(Vector3::new(0.5, 0.0, 0.0)));
        let before = scene.world_transform(node);

        scene.attach(node, b);
        let after = scene.world_transform(node);

        assert_eq!(scene.parent(node), Some(b));
        assert!(!scene.children(a).contains(&node));
        assert_relative_eq!(after.position, before.position, epsilon = 1e-5);
        assert_relative_eq!(after.scale, before.scale, epsilon = 1e-5);
        assert!(after.rotation.angle_to(&before.rotation) < 1e-4);
    }
}
