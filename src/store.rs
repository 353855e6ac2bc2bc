//! Snapshot store for the project.
//!
//! Readers load the current `Arc<Project>` and never see a partial edit.
//! Writers replace the whole project.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::project::Project;

pub struct Store {
    project: ArcSwap<Project>,
}

impl Store {
    pub fn new(project: Project) -> Self {
        Self {
            project: ArcSwap::from_pointee(project),
        }
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<Project> {
        self.project.load_full()
    }

    /// Apply an edit to a copy of the current project and publish it.
    /// Returns whatever the edit returns.
    pub fn edit<T>(&self, mut f: impl FnMut(&mut Project) -> T) -> T {
        let mut out = None;
        self.project.rcu(|current| {
            let mut next = Project::clone(current);
            out = Some(f(&mut next));
            next
        });
        // rcu always runs the closure at least once
        match out {
            Some(x) => x,
            None => unreachable!(),
        }
    }

    /// Replace the whole project.
    pub fn replace(&self, project: Project) {
        self.project.store(Arc::new(project));
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(Project::default())
    }
}
