//! Integración con Qdrant como índice vectorial de materiales.
//!
//! API pública:
//!   - `VectorIndex` (seam asíncrono sobre el índice)
//!   - `QdrantIndex::from_config`, `ensure_collection`, `upsert`, `search`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointStruct, SearchPointsBuilder, Value as QValue,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::models::{MaterialPoint, SearchHit};

/// Contrato del índice vectorial. El scheduler de ingesta y el recuperador de
/// contexto dependen de esto, no del cliente concreto de Qdrant.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotente: crea la colección solo si no existe.
    async fn ensure_collection(&self) -> Result<()>;

    /// Escribe/sobreescribe por id. El lote entero se acepta o la llamada
    /// falla; nunca hay descartes parciales silenciosos en esta capa.
    async fn upsert(&self, points: Vec<MaterialPoint>) -> Result<usize>;

    /// Búsqueda por similitud: resultados ordenados por puntuación
    /// descendente, filtrados por umbral, solo payload (nunca el vector).
    async fn search(
        &self,
        vector: Vec<f32>,
        limit: u64,
        score_threshold: f32,
    ) -> Result<Vec<SearchHit>>;
}

/// Implementación sobre `qdrant-client`.
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    dim: usize,
}

impl QdrantIndex {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let client = Qdrant::from_url(&cfg.qdrant_url)
            .build()
            .map_err(|e| anyhow!("Error creando el cliente de Qdrant: {e}"))?;
        Ok(Self {
            client,
            collection: cfg.collection_name.clone(),
            dim: cfg.vector_dim,
        })
    }

    /// Comprobación de conectividad para el endpoint de salud.
    pub async fn healthcheck(&self) -> Result<()> {
        self.client
            .health_check()
            .await
            .map_err(|e| anyhow!("Qdrant no responde: {e}"))?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self) -> Result<()> {
        if self.client.collection_info(&self.collection).await.is_ok() {
            info!("La colección '{}' ya existe.", self.collection);
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(self.dim as u64, Distance::Cosine)),
            )
            .await
            .map_err(|e| anyhow!("Error creando la colección '{}': {e}", self.collection))?;

        info!(
            "Colección '{}' creada (dim={}, distancia=cosine).",
            self.collection, self.dim
        );
        Ok(())
    }

    async fn upsert(&self, points: Vec<MaterialPoint>) -> Result<usize> {
        if points.is_empty() {
            debug!("Upsert sin puntos; nada que hacer.");
            return Ok(0);
        }

        let total = points.len();
        let mut qdrant_points = Vec::with_capacity(total);
        for p in points {
            let payload = Payload::try_from(serde_json::Value::Object(p.payload))
                .map_err(|e| anyhow!("Payload inválido para el punto {}: {e}", p.id))?;
            qdrant_points.push(PointStruct::new(p.id, p.vector, payload));
        }

        self.client
            .upsert_points(qdrant_client::qdrant::UpsertPointsBuilder::new(
                &self.collection,
                qdrant_points,
            ))
            .await
            .map_err(|e| anyhow!("Error en el upsert de {total} puntos: {e}"))?;

        debug!("Upsert de {total} puntos en '{}' aceptado.", self.collection);
        Ok(total)
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        limit: u64,
        score_threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector, limit)
                    .with_payload(true)
                    .score_threshold(score_threshold),
            )
            .await
            .map_err(|e| anyhow!("Error en la búsqueda vectorial: {e}"))?;

        Ok(response
            .result
            .into_iter()
            .map(|p| SearchHit {
                score: p.score,
                payload: qpayload_to_json(p.payload),
            })
            .collect())
    }
}

/// Convierte un payload de Qdrant (`HashMap<String, qdrant::Value>`) a JSON,
/// incluyendo estructuras y listas anidadas.
fn qpayload_to_json(payload: std::collections::HashMap<String, QValue>) -> serde_json::Value {
    let mut map = serde_json::Map::with_capacity(payload.len());
    for (k, v) in payload {
        map.insert(k, qvalue_to_json(v));
    }
    serde_json::Value::Object(map)
}

fn qvalue_to_json(value: QValue) -> serde_json::Value {
    use qdrant_client::qdrant::value::Kind;
    match value.kind {
        Some(Kind::StringValue(s)) => serde_json::Value::String(s),
        Some(Kind::IntegerValue(i)) => serde_json::Value::Number(i.into()),
        Some(Kind::DoubleValue(f)) => serde_json::json!(f),
        Some(Kind::BoolValue(b)) => serde_json::Value::Bool(b),
        Some(Kind::ListValue(list)) => {
            serde_json::Value::Array(list.values.into_iter().map(qvalue_to_json).collect())
        }
        Some(Kind::StructValue(s)) => {
            let mut map = serde_json::Map::with_capacity(s.fields.len());
            for (k, v) in s.fields {
                map.insert(k, qvalue_to_json(v));
            }
            serde_json::Value::Object(map)
        }
        Some(Kind::NullValue(_)) | None => serde_json::Value::Null,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryIndex;
    use super::*;
    use qdrant_client::qdrant::value::Kind;
    use qdrant_client::qdrant::{ListValue, Struct};

    fn point(id: u64, vector: Vec<f32>, name: &str) -> MaterialPoint {
        let mut payload = serde_json::Map::new();
        payload.insert("name".into(), serde_json::json!(name));
        MaterialPoint {
            id,
            text: name.to_string(),
            vector,
            payload,
        }
    }

    #[test]
    fn convierte_payloads_anidados_a_json() {
        let mut fields = std::collections::HashMap::new();
        fields.insert(
            "uom".to_string(),
            QValue {
                kind: Some(Kind::StringValue("PCS".into())),
            },
        );
        let mut payload = std::collections::HashMap::new();
        payload.insert(
            "stock".to_string(),
            QValue {
                kind: Some(Kind::DoubleValue(12.5)),
            },
        );
        payload.insert(
            "detalle".to_string(),
            QValue {
                kind: Some(Kind::StructValue(Struct { fields })),
            },
        );
        payload.insert(
            "tags".to_string(),
            QValue {
                kind: Some(Kind::ListValue(ListValue {
                    values: vec![QValue {
                        kind: Some(Kind::IntegerValue(3)),
                    }],
                })),
            },
        );

        let json = qpayload_to_json(payload);
        assert_eq!(json["stock"], 12.5);
        assert_eq!(json["detalle"]["uom"], "PCS");
        assert_eq!(json["tags"][0], 3);
    }

    #[tokio::test]
    async fn el_upsert_por_id_es_idempotente() {
        let index = MemoryIndex::default();
        index
            .upsert(vec![point(1, vec![1.0, 0.0], "version vieja")])
            .await
            .unwrap();
        index
            .upsert(vec![point(1, vec![1.0, 0.0], "version nueva")])
            .await
            .unwrap();

        let hits = index.search(vec![1.0, 0.0], 10, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload["name"], "version nueva");
    }

    #[tokio::test]
    async fn la_busqueda_filtra_por_umbral_y_ordena_descendente() {
        let index = MemoryIndex::default();
        index
            .upsert(vec![
                point(1, vec![1.0, 0.0], "exacto"),
                point(2, vec![0.7, 0.7], "cercano"),
                point(3, vec![-1.0, 0.0], "opuesto"),
            ])
            .await
            .unwrap();

        let hits = index.search(vec![1.0, 0.0], 10, 0.5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.iter().all(|h| h.score >= 0.5));
        assert_eq!(hits[0].payload["name"], "exacto");
    }
}
