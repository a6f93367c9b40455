//! Representación textual determinista de un material y su payload plano.
//!
//! Funciones puras: el mismo material produce siempre el mismo texto, que es
//! lo que hace reproducibles los embeddings (y los tests).

use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};

use crate::models::{Material, MaterialPoint};

const UNKNOWN: &str = "desconocido";

/// Párrafo en lenguaje natural con todos los campos del material sustituidos
/// en una plantilla fija. Los opcionales ausentes se escriben como
/// "desconocido", nunca en blanco. Espaciado normalizado.
pub fn material_text(m: &Material) -> String {
    let uom = field(&m.uom);

    let packaging_info = match m.packaging.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(packaging) => format!("{} {} en embalaje {}", field(&m.packaging_unit), uom, packaging),
        None => UNKNOWN.to_string(),
    };

    let stock_info = match m.stock {
        Some(stock) => format!("{} {}", stock, uom),
        None => UNKNOWN.to_string(),
    };

    let text = format!(
        "Material con código {material_no}, es decir {description}, es un artículo de \
         categoría {category} y tipo {tipo}. Se utiliza para necesidades de producción o \
         mantenimiento. Está almacenado en el rack {rack} del almacén {storage}, planta \
         {plant}, warehouse {warehouse}. Lo suministra {supplier}, embalado en \
         {packaging_info}, con unidad de medida {uom}. Precio por {uom}: {price}, y pedido \
         mínimo de {min_order}. Se gestiona con MRP tipo {mrp_type}, stock mínimo \
         {min_stock}, stock máximo {max_stock}. La última actualización registró \
         {stock_info} el {stock_updated_at} por {stock_updated_by}, y el estado actual del \
         stock es {stock_status}.",
        material_no = non_empty(&m.material_no),
        description = non_empty(&m.description),
        category = field(&m.category),
        tipo = field(&m.material_type),
        rack = field(&m.address_rack_name),
        storage = field(&m.storage_name),
        plant = field(&m.plant),
        warehouse = field(&m.warehouse),
        supplier = field(&m.supplier),
        packaging_info = packaging_info,
        uom = uom,
        price = number(m.price),
        min_order = number(m.min_order),
        mrp_type = field(&m.mrp_type),
        min_stock = number(m.min_stock),
        max_stock = number(m.max_stock),
        stock_info = stock_info,
        stock_updated_at = field(&m.stock_updated_at),
        stock_updated_by = field(&m.stock_updated_by),
        stock_status = field(&m.stock_status),
    );

    // Normalizar espacios en blanco
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Mapa plano con los mismos campos del material; es lo que el índice
/// vectorial devuelve después como contexto al llamante.
pub fn material_payload(m: &Material, text: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("materialCode".into(), json!(m.material_no));
    payload.insert("name".into(), json!(m.description));
    payload.insert("addressRackName".into(), json!(m.address_rack_name));
    payload.insert("storageName".into(), json!(m.storage_name));
    payload.insert("supplier".into(), json!(m.supplier));
    payload.insert("plant".into(), json!(m.plant));
    payload.insert("warehouse".into(), json!(m.warehouse));
    payload.insert("packaging".into(), json!(m.packaging));
    payload.insert("packagingUnit".into(), json!(m.packaging_unit));
    payload.insert("uom".into(), json!(m.uom));
    payload.insert("price".into(), json!(m.price));
    payload.insert("type".into(), json!(m.material_type));
    payload.insert("category".into(), json!(m.category));
    payload.insert("minOrder".into(), json!(m.min_order));
    payload.insert("mrpType".into(), json!(m.mrp_type));
    payload.insert("minStock".into(), json!(m.min_stock));
    payload.insert("maxStock".into(), json!(m.max_stock));
    payload.insert("stock".into(), json!(m.stock));
    payload.insert("stockStatus".into(), json!(m.stock_status));
    payload.insert("stockUpdatedAt".into(), json!(m.stock_updated_at));
    payload.insert("stockUpdatedBy".into(), json!(m.stock_updated_by));
    payload.insert("text".into(), json!(text));
    payload
}

/// Ensambla el punto vectorial de un material. El id del punto es el id del
/// material: re-ingestar sobreescribe, nunca duplica. Un id negativo se
/// rechaza; plegarlo sobre su valor absoluto colisionaría con otro material.
pub fn material_point(m: &Material, text: String, vector: Vec<f32>) -> Result<MaterialPoint> {
    let id = u64::try_from(m.id)
        .map_err(|_| anyhow!("Id de material negativo: {}", m.id))?;
    let payload = material_payload(m, &text);
    Ok(MaterialPoint {
        id,
        text,
        vector,
        payload,
    })
}

fn field(opt: &Option<String>) -> &str {
    opt.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN)
}

fn non_empty(s: &str) -> &str {
    let s = s.trim();
    if s.is_empty() {
        UNKNOWN
    } else {
        s
    }
}

fn number(opt: Option<f64>) -> String {
    match opt {
        Some(n) => n.to_string(),
        None => UNKNOWN.to_string(),
    }
}
