//! Builds the ordered task list for a run from the Drive tree.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::classify::{ClassifierRules, NodeFacts};
use crate::drive::{DriveClient, DriveError, DriveNode};
use crate::task::{ImportTask, Lineage, SourceRef, TaskId, TaskKind, TaskStatus};

/// How the import root maps onto courses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeMode {
    /// Every folder directly under the root is a course.
    Collection,
    /// The root itself is the course (the import targets an existing course).
    SingleCourse,
}

/// A node with the part of its subtree that was listed.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub node: DriveNode,
    /// 0 for courses, 1 for modules.
    pub depth: u32,
    pub children: Vec<TreeNode>,
}

/// The enumerated Drive tree. `nodes` holds the depth-0 entries.
#[derive(Debug, Clone)]
pub struct SourceTree {
    pub root: DriveNode,
    pub mode: TreeMode,
    pub nodes: Vec<TreeNode>,
}

impl SourceTree {
    /// Build a tree from nodes that are already in memory.
    pub fn new(root: DriveNode, mode: TreeMode, nodes: Vec<TreeNode>) -> Self {
        Self { root, mode, nodes }
    }
}

/// Walk the Drive tree below `root`. Only course and module folders are
/// descended into; deeper folders are recorded but never listed.
pub async fn enumerate_tree(
    drive: &dyn DriveClient,
    root: DriveNode,
    mode: TreeMode,
    rules: &ClassifierRules,
) -> Result<SourceTree, DriveError> {
    let nodes = match mode {
        TreeMode::SingleCourse => vec![expand(drive, root.clone(), 0, rules).await?],
        TreeMode::Collection => {
            let mut nodes = Vec::new();
            for child in drive.list_children(&root.id).await? {
                nodes.push(expand(drive, child, 0, rules).await?);
            }
            nodes
        }
    };
    debug!(root = %root.id, top_level = nodes.len(), "enumerated drive tree");
    Ok(SourceTree { root, mode, nodes })
}

fn expand<'a>(
    drive: &'a dyn DriveClient,
    node: DriveNode,
    depth: u32,
    rules: &'a ClassifierRules,
) -> BoxFuture<'a, Result<TreeNode, DriveError>> {
    async move {
        let kind = rules.classify(&facts(&node, depth));
        let mut children = Vec::new();
        if kind.is_container() {
            for child in drive.list_children(&node.id).await? {
                children.push(expand(drive, child, depth + 1, rules).await?);
            }
        }
        Ok(TreeNode {
            node,
            depth,
            children,
        })
    }
    .boxed()
}

fn facts(node: &DriveNode, depth: u32) -> NodeFacts<'_> {
    NodeFacts {
        name: &node.name,
        mime_type: &node.mime_type,
        is_folder: node.is_folder(),
        depth,
    }
}

/// Flatten the tree in stable pre-order: every course, then its modules,
/// then their lessons, in listing order. No re-sorting.
pub fn build_tasks(tree: &SourceTree, rules: &ClassifierRules) -> Vec<ImportTask> {
    let prefix = match tree.mode {
        TreeMode::Collection => vec![tree.root.id.clone()],
        TreeMode::SingleCourse => Vec::new(),
    };
    let mut tasks = Vec::new();
    for (position, node) in tree.nodes.iter().enumerate() {
        visit(
            node,
            position as u32,
            &prefix,
            "",
            None,
            &Lineage::default(),
            rules,
            &mut tasks,
        );
    }
    tasks
}

#[allow(clippy::too_many_arguments)]
fn visit(
    tree: &TreeNode,
    position: u32,
    prefix: &[String],
    display_prefix: &str,
    parent: Option<TaskId>,
    lineage: &Lineage,
    rules: &ClassifierRules,
    out: &mut Vec<ImportTask>,
) {
    let node = &tree.node;
    let mut ids = prefix.to_vec();
    ids.push(node.id.clone());
    let id = TaskId::from_path(&ids);
    let kind = rules.classify(&facts(node, tree.depth));
    let path = if display_prefix.is_empty() {
        node.name.clone()
    } else {
        format!("{display_prefix}/{}", node.name)
    };

    out.push(ImportTask {
        id,
        kind,
        name: node.name.clone(),
        mime_type: node.mime_type.clone(),
        path: path.clone(),
        depth: tree.depth,
        position,
        source: SourceRef {
            id: node.id.clone(),
            revision: node.modified_time.clone(),
        },
        parent,
        lineage: lineage.clone(),
        size: node.size,
        web_view_link: node.web_view_link.clone(),
        status: TaskStatus::Pending,
        error: None,
        entity_id: None,
        attempts: 0,
    });

    let child_lineage = match kind {
        TaskKind::Course => Lineage {
            course_source: Some(node.id.clone()),
            module_source: None,
        },
        TaskKind::Module => Lineage {
            course_source: lineage.course_source.clone(),
            module_source: Some(node.id.clone()),
        },
        _ => return,
    };
    for (i, child) in tree.children.iter().enumerate() {
        visit(
            child,
            i as u32,
            &ids,
            &path,
            Some(id),
            &child_lineage,
            rules,
            out,
        );
    }
}

/// Carry statuses of a prior run over to a freshly built task list.
///
/// - done stays done, unless the Drive revision changed since
/// - failed stays failed with its error, and will be executed again
/// - anything caught in progress starts over as pending
pub fn merge_with_existing(new_tasks: Vec<ImportTask>, prior: &[ImportTask]) -> Vec<ImportTask> {
    let prior: HashMap<TaskId, &ImportTask> = prior.iter().map(|t| (t.id, t)).collect();
    new_tasks
        .into_iter()
        .map(|mut task| {
            let Some(old) = prior.get(&task.id) else {
                return task;
            };
            task.entity_id = old.entity_id.clone();
            task.attempts = old.attempts;
            match old.status {
                TaskStatus::Done if old.source.revision == task.source.revision => {
                    task.status = TaskStatus::Done;
                }
                TaskStatus::Failed => {
                    task.status = TaskStatus::Failed;
                    task.error = old.error.clone();
                }
                _ => {}
            }
            task
        })
        .collect()
}

/// Counts per kind and status.
/// Task counts of a run, by kind and by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub total: usize,
    pub courses: usize,
    pub modules: usize,
    /// Video and document lessons.
    pub lessons: usize,
    pub quizzes: usize,
    pub skipped: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub failed: usize,
    /// Share of tasks that reached done or failed.
    pub percentage: u8,
}

/// Count tasks by kind and status. An empty list is 100% complete.
pub fn summarize(tasks: &[ImportTask]) -> ImportSummary {
    let mut summary = ImportSummary {
        total: tasks.len(),
        ..Default::default()
    };
    for task in tasks {
        match task.kind {
            TaskKind::Course => summary.courses += 1,
            TaskKind::Module => summary.modules += 1,
            TaskKind::LessonVideo | TaskKind::LessonDocument => summary.lessons += 1,
            TaskKind::Quiz => summary.quizzes += 1,
            TaskKind::Skip => summary.skipped += 1,
        }
        match task.status {
            TaskStatus::Pending => summary.pending += 1,
            TaskStatus::InProgress => summary.in_progress += 1,
            TaskStatus::Done => summary.done += 1,
            TaskStatus::Failed => summary.failed += 1,
        }
    }
    summary.percentage = if summary.total == 0 {
        100
    } else {
        ((summary.done + summary.failed) * 100 / summary.total) as u8
    };
    summary
}
