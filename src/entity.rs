//! Entity metadata interpretation.
//!
//! An entity is a JSON object with a string id and an optional metadata
//! envelope. Within the envelope a `local` marker records that the id was
//! generated on this device and the backend has never acknowledged the
//! entity.

use serde_json::Value;
use uuid::Uuid;

/// Prefix of device-generated entity ids.
pub const LOCAL_ID_PREFIX: &str = "local_";
/// Marker key inside the metadata envelope.
pub const LOCAL_MARKER: &str = "local";

/// Generate a device-local entity id: `local_` followed by 24 hex chars.
pub fn generate_entity_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{LOCAL_ID_PREFIX}{}", &hex[..24])
}

/// Read the entity's id, if present and a string.
pub fn entity_id<'a>(entity: &'a Value, id_attribute: &str) -> Option<&'a str> {
    entity.get(id_attribute).and_then(Value::as_str)
}

/// True when the entity was created offline: the metadata envelope carries
/// `local: true`, meaning the id is device-generated and server-unknown.
pub fn is_local(entity: &Value, kmd_attribute: &str) -> bool {
    entity
        .get(kmd_attribute)
        .and_then(|kmd| kmd.get(LOCAL_MARKER))
        .and_then(Value::as_bool)
        == Some(true)
}

/// Prepare a locally-created entity for its first POST: remove the
/// device-generated id and the `local` marker. An emptied envelope is
/// dropped entirely.
pub fn strip_for_create(entity: &Value, id_attribute: &str, kmd_attribute: &str) -> Value {
    let mut out = entity.clone();
    if let Some(obj) = out.as_object_mut() {
        obj.remove(id_attribute);
        let drop_kmd = match obj.get_mut(kmd_attribute).and_then(Value::as_object_mut) {
            Some(kmd) => {
                kmd.remove(LOCAL_MARKER);
                kmd.is_empty()
            }
            None => false,
        };
        if drop_kmd {
            obj.remove(kmd_attribute);
        }
    }
    out
}
