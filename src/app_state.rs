use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::embedding::EmbeddingClient;
use crate::models::{JobRecord, JobState};
use crate::rag::QueryEngine;
use crate::vector_store::{QdrantIndex, VectorIndex};
use crate::warehouse::WarehouseData;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub qdrant: Arc<QdrantIndex>,
    pub index: Arc<dyn VectorIndex>,
    pub data: Arc<dyn WarehouseData>,
    pub embedder: EmbeddingClient,
    pub engine: Arc<QueryEngine>,
    pub jobs: Jobs,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
}

impl Status {
    /// Pasa a ocupado solo si estaba libre. La comprobación y la marca van
    /// juntas bajo el mismo lock del llamante: dos ingestas simultáneas no
    /// pueden colarse entre una y otra.
    pub fn begin(&mut self, message: impl Into<String>) -> bool {
        if self.is_busy {
            return false;
        }
        self.is_busy = true;
        self.message = message.into();
        self.progress = 0.0;
        true
    }
}

/// Tablero de jobs de ingesta en memoria. Los registros viven lo que vive el
/// proceso; no hay persistencia.
#[derive(Clone, Default)]
pub struct Jobs {
    records: Arc<Mutex<HashMap<Uuid, JobRecord>>>,
}

impl Jobs {
    /// Registra un job nuevo en estado `queued` y devuelve su id.
    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.records
            .lock()
            .unwrap()
            .insert(id, JobRecord::queued(id));
        id
    }

    pub fn get(&self, id: Uuid) -> Option<JobRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    /// Lista los jobs conocidos, los más recientes primero.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut all: Vec<JobRecord> = self.records.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all
    }

    pub fn update(&self, id: Uuid, apply: impl FnOnce(&mut JobRecord)) {
        if let Some(record) = self.records.lock().unwrap().get_mut(&id) {
            apply(record);
        }
    }

    pub fn mark_running(&self, id: Uuid) {
        self.update(id, |job| {
            job.state = JobState::Running;
            job.message = "Ingesta en curso.".to_string();
            job.started_at = Some(Utc::now());
        });
    }

    pub fn mark_completed(&self, id: Uuid, message: String) {
        self.update(id, |job| {
            job.state = JobState::Completed;
            job.progress = 1.0;
            job.message = message;
            job.finished_at = Some(Utc::now());
        });
    }

    pub fn mark_failed(&self, id: Uuid, error: String) {
        self.update(id, |job| {
            job.state = JobState::Failed;
            job.message = "La ingesta terminó con error.".to_string();
            job.error = Some(error);
            job.finished_at = Some(Utc::now());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn el_ciclo_de_vida_de_un_job_queda_registrado() {
        let jobs = Jobs::default();
        let id = jobs.create();
        assert_eq!(jobs.get(id).unwrap().state, JobState::Queued);

        jobs.mark_running(id);
        let running = jobs.get(id).unwrap();
        assert_eq!(running.state, JobState::Running);
        assert!(running.started_at.is_some());

        jobs.mark_completed(id, "listo".into());
        let done = jobs.get(id).unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert!(done.finished_at.is_some());
        assert!((done.progress - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn un_job_fallido_conserva_el_detalle_del_error() {
        let jobs = Jobs::default();
        let id = jobs.create();
        jobs.mark_running(id);
        jobs.mark_failed(id, "upsert rechazado".into());

        let failed = jobs.get(id).unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.error.as_deref(), Some("upsert rechazado"));
    }

    #[test]
    fn solo_una_ingesta_puede_marcar_el_estado_como_ocupado() {
        let mut status = Status::default();
        assert!(status.begin("primera"));
        assert!(status.is_busy);
        assert!(!status.begin("segunda"));
        assert_eq!(status.message, "primera");
    }

    #[test]
    fn la_lista_devuelve_todos_los_jobs() {
        let jobs = Jobs::default();
        let a = jobs.create();
        let b = jobs.create();
        let listed = jobs.list();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|j| j.id == a));
        assert!(listed.iter().any(|j| j.id == b));
    }
}
