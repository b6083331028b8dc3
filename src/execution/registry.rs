use crate::db::HistoryStore;
use crate::models::Project;
use crate::Result;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// In-memory mirror of the active projects
///
/// A single lock guards the whole list. The manager holds it for an entire
/// refresh pass, so refresh cycles never overlap.
#[derive(Clone, Default)]
pub struct ProjectRegistry {
    projects: Arc<Mutex<Vec<Project>>>,
}

impl ProjectRegistry {
    pub fn new(projects: Vec<Project>) -> Self {
        Self {
            projects: Arc::new(Mutex::new(projects)),
        }
    }

    /// Restore the active set from the store
    pub async fn load(store: &dyn HistoryStore) -> Result<Self> {
        let projects = store.load_active_projects().await?;
        tracing::info!("Restored {} active projects", projects.len());
        Ok(Self::new(projects))
    }

    /// Exclusive access for a full refresh pass
    pub async fn lock(&self) -> MutexGuard<'_, Vec<Project>> {
        self.projects.lock().await
    }

    pub async fn snapshot(&self) -> Vec<Project> {
        self.projects.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.projects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.projects.lock().await.is_empty()
    }

    pub async fn contains(&self, project_id: i64) -> bool {
        self.projects.lock().await.iter().any(|p| p.id == project_id)
    }
}

/// Bring a locked project list in line with the store's active rows
///
/// Operator-controlled fields (`force_quit`, `quit_protect`, order ids) come
/// from the store row; balances and roi keep the values last computed in
/// memory. Rows new in the store are added, projects no longer active there
/// are dropped. Returns `(added, dropped)`.
pub fn reconcile(projects: &mut Vec<Project>, active: Vec<Project>) -> (usize, usize) {
    let mut added = 0;
    let mut merged = Vec::with_capacity(active.len());

    for row in active {
        match projects.iter().position(|p| p.id == row.id) {
            Some(idx) => {
                let mut project = projects.swap_remove(idx);
                project.force_quit = row.force_quit;
                project.quit_protect = row.quit_protect;
                project.client_order_id = row.client_order_id;
                project.order_id = row.order_id;
                merged.push(project);
            }
            None => {
                added += 1;
                merged.push(row);
            }
        }
    }

    let dropped = projects.len();
    *projects = merged;
    (added, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn create_test_project(id: i64) -> Project {
        Project {
            id,
            symbol: "KEYBTC".to_string(),
            initial_balance_quote: Decimal::from(100),
            balance_base: Decimal::ZERO,
            balance_quote: Decimal::from(100),
            roi: 0.0,
            created_at: Utc::now(),
            force_quit: false,
            quit_protect: false,
            client_order_id: format!("client-{}", id),
            order_id: id,
        }
    }

    #[tokio::test]
    async fn test_load_skips_closed_projects() {
        let store = MemoryStore::new();
        store.add_project(create_test_project(1)).unwrap();
        store.add_project(create_test_project(2)).unwrap();
        store.close_project(2, Utc::now()).await.unwrap();

        let registry = ProjectRegistry::load(&store).await.unwrap();
        assert_eq!(registry.len().await, 1);
        assert!(registry.contains(1).await);
        assert!(!registry.contains(2).await);
    }

    #[tokio::test]
    async fn test_reconcile_takes_flags_keeps_derived_fields() {
        let registry = ProjectRegistry::new(vec![create_test_project(1), create_test_project(3)]);
        assert!(!registry.is_empty().await);

        {
            let mut projects = registry.lock().await;
            projects[0].roi = 0.2;
            projects[0].balance_base = Decimal::from(4);
        }

        // Store: project 1 flagged by the operator, 3 closed, 2 opened
        let mut flagged = create_test_project(1);
        flagged.force_quit = true;
        flagged.quit_protect = true;
        let active = vec![flagged, create_test_project(2)];

        let mut projects = registry.lock().await;
        let (added, dropped) = reconcile(&mut projects, active);
        assert_eq!((added, dropped), (1, 1));

        let ids: Vec<i64> = projects.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(projects[0].force_quit && projects[0].quit_protect);
        assert_eq!(projects[0].roi, 0.2);
        assert_eq!(projects[0].balance_base, Decimal::from(4));
    }
}
