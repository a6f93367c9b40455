//! Cliente del backend de almacén: feed de materiales y consultas
//! estructuradas con nombre. Colaborador fino; el esquema y el SQL viven en
//! el otro servicio.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::models::{Material, ReportType};

/// Filtro de estado de stock para las consultas estructuradas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockStatusFilter {
    Critical,
    Over,
}

impl StockStatusFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatusFilter::Critical => "critical",
            StockStatusFilter::Over => "over",
        }
    }
}

/// Fila de la consulta de ubicaciones (material ⋈ ubicación).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRow {
    #[serde(default)]
    pub material_no: String,
    #[serde(default)]
    pub description: String,
    pub address_rack_name: Option<String>,
    pub storage_name: Option<String>,
    pub plant: Option<String>,
    pub warehouse: Option<String>,
}

/// Fila del agregado de stock por ubicación.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationStockRow {
    #[serde(default)]
    pub storage_name: String,
    pub plant: Option<String>,
    pub total_stock: Option<f64>,
    pub material_count: Option<u64>,
}

/// Fila del log de transacciones de almacén.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRow {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub material_no: String,
    #[serde(default)]
    pub description: String,
    /// "in" | "out"
    pub movement_type: Option<String>,
    pub quantity: Option<f64>,
    pub created_by: Option<String>,
}

/// Fila de materiales sin movimiento.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InactiveRow {
    #[serde(default)]
    pub material_no: String,
    #[serde(default)]
    pub description: String,
    pub days_since_last_movement: Option<i64>,
    pub stock: Option<f64>,
}

/// Fila de la previsión de cobertura de stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastRow {
    #[serde(default)]
    pub material_no: String,
    #[serde(default)]
    pub description: String,
    pub stock: Option<f64>,
    pub avg_daily_consumption: Option<f64>,
    pub remaining_days: Option<f64>,
}

/// Operaciones de lectura con nombre sobre el backend de almacén.
#[async_trait]
pub trait WarehouseData: Send + Sync {
    /// Lista completa de materiales (feed de ingesta).
    async fn fetch_all_materials(&self) -> Result<Vec<Material>>;

    async fn materials_by_keyword(&self, keyword: &str) -> Result<Vec<Material>>;
    async fn materials_by_stock_status(&self, status: StockStatusFilter)
        -> Result<Vec<Material>>;
    async fn material_locations(&self, keyword: &str) -> Result<Vec<LocationRow>>;
    async fn stock_by_location(&self) -> Result<Vec<LocationStockRow>>;
    async fn transactions(&self, window: Option<ReportType>) -> Result<Vec<ActivityRow>>;
    async fn inactive_materials(&self, days: u32) -> Result<Vec<InactiveRow>>;
    async fn stock_forecast(&self) -> Result<Vec<ForecastRow>>;
}

/// Implementación HTTP contra la API REST del backend de almacén.
pub struct HttpWarehouseData {
    http: reqwest::Client,
    base_url: String,
}

impl HttpWarehouseData {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.warehouse_api_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| anyhow!("Error llamando a {url}: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("El backend de almacén devolvió HTTP {status} en {url}"));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| anyhow!("Respuesta no decodificable de {url}: {e}"))
    }
}

#[async_trait]
impl WarehouseData for HttpWarehouseData {
    async fn fetch_all_materials(&self) -> Result<Vec<Material>> {
        self.get_json("inventory-material-all", &[]).await
    }

    async fn materials_by_keyword(&self, keyword: &str) -> Result<Vec<Material>> {
        self.get_json("materials", &[("keyword", keyword.to_string())])
            .await
    }

    async fn materials_by_stock_status(
        &self,
        status: StockStatusFilter,
    ) -> Result<Vec<Material>> {
        self.get_json(
            "materials-by-status",
            &[("status", status.as_str().to_string())],
        )
        .await
    }

    async fn material_locations(&self, keyword: &str) -> Result<Vec<LocationRow>> {
        self.get_json("material-locations", &[("keyword", keyword.to_string())])
            .await
    }

    async fn stock_by_location(&self) -> Result<Vec<LocationStockRow>> {
        self.get_json("stock-by-location", &[]).await
    }

    async fn transactions(&self, window: Option<ReportType>) -> Result<Vec<ActivityRow>> {
        let mut query = Vec::new();
        if let Some(w) = window {
            query.push(("window", w.as_str().to_string()));
        }
        self.get_json("transactions", &query).await
    }

    async fn inactive_materials(&self, days: u32) -> Result<Vec<InactiveRow>> {
        self.get_json("inactive-materials", &[("days", days.to_string())])
            .await
    }

    async fn stock_forecast(&self) -> Result<Vec<ForecastRow>> {
        self.get_json("stock-forecast", &[]).await
    }
}
