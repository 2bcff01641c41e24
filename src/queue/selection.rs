//! Task selections

use crate::task::{Task, TaskStatus};
use std::sync::Arc;

/// Criterion a selection was taken with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFilter {
    /// Every task
    All,
    /// Tasks in a category
    Category(String),
    /// Tasks carrying a tag
    Tag(String),
    /// Tasks of a type
    Type(String),
    /// Tasks in a status
    Status(TaskStatus),
}

impl TaskFilter {
    /// Check whether a task matches
    pub fn matches(&self, task: &Task) -> bool {
        match self {
            TaskFilter::All => true,
            TaskFilter::Category(category) => task.category == *category,
            TaskFilter::Tag(tag) => task.has_tag(tag),
            TaskFilter::Type(task_type) => task.task_type == *task_type,
            TaskFilter::Status(status) => task.status == *status,
        }
    }
}

/// Point-in-time set of matching tasks, ordered by creation time.
///
/// Taking a selection only clones `Arc`s; later queue changes are not
/// reflected. It can be iterated any number of times.
#[derive(Debug, Clone)]
pub struct TaskSelection {
    filter: TaskFilter,
    tasks: Vec<Arc<Task>>,
}

impl TaskSelection {
    pub(crate) fn new(filter: TaskFilter, mut tasks: Vec<Arc<Task>>) -> Self {
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Self { filter, tasks }
    }

    /// Filter this selection was taken with
    pub fn filter(&self) -> &TaskFilter {
        &self.filter
    }

    /// Iterate the tasks; each call starts from the beginning
    pub fn iter(&self) -> SelectionIter<'_> {
        SelectionIter {
            inner: self.tasks.iter(),
        }
    }

    /// Number of tasks selected
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the selection matched no task
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Ids in selection order
    pub fn ids(&self) -> Vec<String> {
        self.iter().map(|task| task.id.clone()).collect()
    }

    /// Owned copies of the selected tasks
    pub fn to_vec(&self) -> Vec<Task> {
        self.iter().cloned().collect()
    }
}

/// Iterator over a [`TaskSelection`]
#[derive(Debug, Clone)]
pub struct SelectionIter<'a> {
    inner: std::slice::Iter<'a, Arc<Task>>,
}

impl<'a> Iterator for SelectionIter<'a> {
    type Item = &'a Task;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|task| task.as_ref())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for SelectionIter<'_> {}

impl<'a> IntoIterator for &'a TaskSelection {
    type Item = &'a Task;
    type IntoIter = SelectionIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Params;

    #[test]
    fn test_selection_is_restartable() {
        let mut docker = Task::new("docker_push", Params::new());
        docker.category = "docker".into();
        docker.tags.insert("registry".into());
        let ssh = Task::new("ssh_execute", Params::new());

        let filter = TaskFilter::Tag("registry".into());
        assert!(filter.matches(&docker));
        assert!(!filter.matches(&ssh));

        let selection = TaskSelection::new(
            TaskFilter::All,
            vec![Arc::new(ssh.clone()), Arc::new(docker.clone())],
        );
        assert_eq!(selection.len(), 2);
        let first: Vec<&str> = selection.iter().map(|t| t.id.as_str()).collect();
        let second: Vec<&str> = (&selection).into_iter().map(|t| t.id.as_str()).collect();
        assert_eq!(first, second);
        assert!(selection.iter().zip(selection.iter().skip(1)).all(|(a, b)| a.created_at <= b.created_at));
        assert_eq!(selection.to_vec().len(), 2);
    }
}
