//! JavaScript bindings.
//!
//! Browsers have no OS threads to hand work to, so these exports call the
//! pipeline directly; the page is expected to run them inside a Web Worker.

use js_sys::{Array, Object, Reflect, Uint8Array};
use wasm_bindgen::prelude::*;

use crate::filament::FilamentInventory;
use crate::pipeline::{self, QuantizeOptions, QuantizeRequest};
use crate::regions::Region;
use crate::sampler::ImageData;

fn js_err(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Serialize through JSON so field names match the serde (camelCase) shape.
fn to_js<T: serde::Serialize>(value: &T) -> Result<JsValue, JsValue> {
    let json = serde_json::to_string(value).map_err(js_err)?;
    js_sys::JSON::parse(&json)
}

/// Quantize an RGBA buffer into regions.
///
/// Returns `{ regions, palette, assignments, regionMap, originalColorCount, finalColorCount }`.
/// `regionMap.data` is a `Uint8Array` rather than a plain array.
#[wasm_bindgen(js_name = quantizeImage)]
pub fn quantize_image(
    data: Vec<u8>,
    width: u32,
    height: u32,
    max_colors: usize,
    algorithm: String,
    merge_threshold: Option<f64>,
    seed: Option<u64>,
) -> Result<Object, JsValue> {
    let options = QuantizeOptions {
        max_colors,
        algorithm: algorithm.parse().map_err(js_err)?,
        merge_threshold: merge_threshold.unwrap_or(QuantizeOptions::default().merge_threshold),
        seed,
    };
    let request = QuantizeRequest::new(ImageData { data, width, height }, options);
    let result = pipeline::quantize_image(&request).map_err(js_err)?;

    let region_map = Object::new();
    Reflect::set(
        &region_map,
        &JsValue::from_str("data"),
        &Uint8Array::from(result.region_map.data.as_slice()),
    )?;
    Reflect::set(&region_map, &JsValue::from_str("width"), &JsValue::from(width))?;
    Reflect::set(&region_map, &JsValue::from_str("height"), &JsValue::from(height))?;

    let out = Object::new();
    Reflect::set(&out, &JsValue::from_str("regions"), &to_js(&result.regions)?)?;
    Reflect::set(&out, &JsValue::from_str("palette"), &to_js(&result.palette)?)?;
    Reflect::set(&out, &JsValue::from_str("assignments"), &to_js(&result.assignments)?)?;
    Reflect::set(&out, &JsValue::from_str("regionMap"), &region_map)?;
    Reflect::set(
        &out,
        &JsValue::from_str("originalColorCount"),
        &JsValue::from(result.original_color_count as u32),
    )?;
    Reflect::set(
        &out,
        &JsValue::from_str("finalColorCount"),
        &JsValue::from(result.final_color_count as u32),
    )?;
    Ok(out)
}

#[wasm_bindgen(js_name = analyzeImage)]
pub fn analyze_image(data: Vec<u8>, width: u32, height: u32) -> Result<JsValue, JsValue> {
    let analysis = pipeline::analyze_image(&ImageData { data, width, height }).map_err(js_err)?;
    to_js(&analysis)
}

/// Greedy region → filament mapping.
///
/// `regions` is the array returned by `quantizeImage`; `inventory_json` is a
/// JSON array of filament records, or `undefined` for the bundled inventory.
#[wasm_bindgen(js_name = autoMapRegions)]
pub fn auto_map_regions(regions: Array, inventory_json: Option<String>) -> Result<JsValue, JsValue> {
    let inventory = match inventory_json {
        Some(json) => FilamentInventory::from_json(&json),
        None => FilamentInventory::builtin(),
    }
    .map_err(js_err)?;

    let regions_json = js_sys::JSON::stringify(&regions)?
        .as_string()
        .ok_or_else(|| JsValue::from_str("Regions must be JSON-serializable"))?;
    let regions: Vec<Region> = serde_json::from_str(&regions_json).map_err(js_err)?;

    let assignments = inventory.auto_map_regions(&regions).map_err(js_err)?;
    to_js(&assignments)
}
