//! Operation catalog
//!
//! Static table of every OCPP operation the Central System knows, with the
//! payload fields each one accepts. Used to validate commands before they are
//! sent to a charge point and Calls received from one.

use std::collections::HashMap;
use std::sync::OnceLock;

use serde_json::{Map, Value};
use thiserror::Error;

/// Which side initiates an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Central System → Charge Point command
    ToChargePoint,
    /// Charge Point → Central System request
    ToCentralSystem,
    Both,
}

impl Direction {
    pub fn outbound(&self) -> bool {
        matches!(self, Self::ToChargePoint | Self::Both)
    }

    pub fn inbound(&self) -> bool {
        matches!(self, Self::ToCentralSystem | Self::Both)
    }
}

/// Wire type of a payload field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    /// Object or array (profiles, meter values, key lists)
    Structured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
    pub kind: FieldKind,
}

const fn req(name: &'static str) -> FieldSpec {
    FieldSpec { name, required: true, kind: FieldKind::Text }
}

const fn opt(name: &'static str) -> FieldSpec {
    FieldSpec { name, required: false, kind: FieldKind::Text }
}

const fn req_int(name: &'static str) -> FieldSpec {
    FieldSpec { name, required: true, kind: FieldKind::Integer }
}

const fn opt_int(name: &'static str) -> FieldSpec {
    FieldSpec { name, required: false, kind: FieldKind::Integer }
}

const fn req_obj(name: &'static str) -> FieldSpec {
    FieldSpec { name, required: true, kind: FieldKind::Structured }
}

const fn opt_obj(name: &'static str) -> FieldSpec {
    FieldSpec { name, required: false, kind: FieldKind::Structured }
}

impl FieldSpec {
    /// Value of this field given as text (a query string parameter).
    /// Integers and structured values that do not parse stay text so the
    /// charge point reports the type error.
    pub fn from_text(&self, raw: String) -> Value {
        match self.kind {
            FieldKind::Text => Value::String(raw),
            FieldKind::Integer => match raw.trim().parse::<i64>() {
                Ok(n) => Value::from(n),
                Err(_) => Value::String(raw),
            },
            FieldKind::Structured => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        }
    }
}

/// Field requirements of one operation, in wire order.
#[derive(Debug, Clone)]
pub struct OperationSpec {
    pub name: &'static str,
    pub direction: Direction,
    pub fields: &'static [FieldSpec],
}

impl OperationSpec {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Not found required key \"{field}\" for {operation}")]
    MissingRequiredField { operation: String, field: String },

    #[error("Invalid key \"{field}\" for {operation}")]
    UnknownField { operation: String, field: String },

    #[error("Invalid endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Payload of {0} must be a JSON object")]
    NotAnObject(String),

    #[error("{operation} cannot be sent {towards}")]
    WrongDirection {
        operation: String,
        towards: &'static str,
    },
}

/// How keys absent from the operation's field list are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownKeys {
    /// Keep them untouched (vendor extensions from charge points)
    Keep,
    /// Fail with [`CatalogError::UnknownField`]
    Reject,
}

// ── Catalog table ──────────────────────────────────────────────

use Direction::{Both, ToCentralSystem as Up, ToChargePoint as Down};

static OPERATIONS: &[OperationSpec] = &[
    OperationSpec { name: "Authorize", direction: Up, fields: &[req("idTag")] },
    OperationSpec {
        name: "BootNotification",
        direction: Up,
        fields: &[
            req("chargePointVendor"),
            req("chargePointModel"),
            opt("chargePointSerialNumber"),
            opt("chargeBoxSerialNumber"),
            opt("firmwareVersion"),
            opt("iccid"),
            opt("imsi"),
            opt("meterType"),
            opt("meterSerialNumber"),
        ],
    },
    OperationSpec { name: "CancelReservation", direction: Down, fields: &[req_int("reservationId")] },
    OperationSpec {
        name: "ChangeAvailability",
        direction: Down,
        fields: &[req_int("connectorId"), req("type")],
    },
    OperationSpec {
        name: "ChangeConfiguration",
        direction: Down,
        fields: &[req("key"), req("value")],
    },
    OperationSpec { name: "ClearCache", direction: Down, fields: &[] },
    OperationSpec {
        name: "ClearChargingProfile",
        direction: Down,
        fields: &[
            opt_int("id"),
            opt_int("connectorId"),
            opt("chargingProfilePurpose"),
            opt_int("stackLevel"),
        ],
    },
    OperationSpec {
        name: "DataTransfer",
        direction: Both,
        fields: &[req("vendorId"), opt("messageId"), opt("data")],
    },
    OperationSpec {
        name: "DiagnosticsStatusNotification",
        direction: Up,
        fields: &[req("status")],
    },
    OperationSpec {
        name: "FirmwareStatusNotification",
        direction: Up,
        fields: &[req("status")],
    },
    OperationSpec {
        name: "GetCompositeSchedule",
        direction: Down,
        fields: &[req_int("connectorId"), req_int("duration"), opt("chargingRateUnit")],
    },
    OperationSpec { name: "GetConfiguration", direction: Down, fields: &[opt_obj("key")] },
    OperationSpec {
        name: "GetDiagnostics",
        direction: Down,
        fields: &[
            req("location"),
            opt_int("retries"),
            opt_int("retryInterval"),
            opt("startTime"),
            opt("stopTime"),
        ],
    },
    OperationSpec { name: "GetLocalListVersion", direction: Down, fields: &[] },
    OperationSpec { name: "Heartbeat", direction: Up, fields: &[] },
    OperationSpec {
        name: "MeterValues",
        direction: Up,
        fields: &[req_int("connectorId"), opt_int("transactionId"), req_obj("meterValue")],
    },
    OperationSpec {
        name: "RemoteStartTransaction",
        direction: Down,
        fields: &[opt_int("connectorId"), req("idTag"), opt_obj("chargingProfile")],
    },
    OperationSpec {
        name: "RemoteStopTransaction",
        direction: Down,
        fields: &[req_int("transactionId")],
    },
    OperationSpec {
        name: "ReserveNow",
        direction: Down,
        fields: &[
            req_int("connectorId"),
            req("expiryDate"),
            req("idTag"),
            opt("parentIdTag"),
            req_int("reservationId"),
        ],
    },
    OperationSpec { name: "Reset", direction: Down, fields: &[req("type")] },
    OperationSpec {
        name: "SendLocalList",
        direction: Down,
        fields: &[req_int("listVersion"), opt_obj("localAuthorizationList"), req("updateType")],
    },
    OperationSpec {
        name: "SetChargingProfile",
        direction: Down,
        fields: &[req_int("connectorId"), req_obj("csChargingProfiles")],
    },
    OperationSpec {
        name: "StartTransaction",
        direction: Up,
        fields: &[
            req_int("connectorId"),
            req("idTag"),
            req_int("meterStart"),
            opt_int("reservationId"),
            req("timestamp"),
        ],
    },
    OperationSpec {
        name: "StatusNotification",
        direction: Up,
        fields: &[
            req_int("connectorId"),
            req("errorCode"),
            opt("info"),
            req("status"),
            opt("timestamp"),
            opt("vendorId"),
            opt("vendorErrorCode"),
        ],
    },
    OperationSpec {
        name: "StopTransaction",
        direction: Up,
        fields: &[
            opt("idTag"),
            req_int("meterStop"),
            req("timestamp"),
            req_int("transactionId"),
            opt("reason"),
            opt_obj("transactionData"),
        ],
    },
    OperationSpec {
        name: "TriggerMessage",
        direction: Down,
        fields: &[req("requestedMessage"), opt_int("connectorId")],
    },
    OperationSpec { name: "UnlockConnector", direction: Down, fields: &[req_int("connectorId")] },
    OperationSpec {
        name: "UpdateFirmware",
        direction: Down,
        fields: &[
            req("location"),
            opt_int("retries"),
            req("retrieveDate"),
            opt_int("retryInterval"),
        ],
    },
];

/// A Central System list served by the backend, with its filter fields.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

static ENDPOINTS: &[EndpointSpec] = &[
    EndpointSpec {
        name: "TransactionList",
        fields: &[req("identity"), opt("dateFrom"), opt("dateTo")],
    },
    EndpointSpec {
        name: "ReservationList",
        fields: &[req("identity"), opt("dateFrom"), opt("dateTo")],
    },
];

// ── OperationCatalog ───────────────────────────────────────────

/// Name-indexed view over the operation table.
pub struct OperationCatalog {
    operations: HashMap<&'static str, &'static OperationSpec>,
}

impl OperationCatalog {
    fn build() -> Self {
        Self {
            operations: OPERATIONS.iter().map(|op| (op.name, op)).collect(),
        }
    }

    /// The process-wide catalog, built on first use.
    pub fn global() -> &'static OperationCatalog {
        static CATALOG: OnceLock<OperationCatalog> = OnceLock::new();
        CATALOG.get_or_init(Self::build)
    }

    pub fn get(&self, name: &str) -> Option<&'static OperationSpec> {
        self.operations.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Operation names in table order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        OPERATIONS.iter().map(|op| op.name)
    }

    /// Validate `payload` against `operation`.
    ///
    /// Returns the normalized payload: `null` and empty-string values of
    /// optional fields are dropped. A required field holding `null` or an
    /// empty string counts as missing.
    pub fn validate(
        &self,
        operation: &str,
        payload: &Value,
        unknown: UnknownKeys,
    ) -> Result<Map<String, Value>, CatalogError> {
        let spec = self
            .get(operation)
            .ok_or_else(|| CatalogError::UnknownOperation(operation.to_string()))?;
        validate_fields(operation, spec.fields, payload, unknown)
    }

    /// Build the payload of `operation` from text parameters, typing each
    /// known field by its [`FieldKind`]. Unknown keys stay text.
    pub fn payload_from_text(
        &self,
        operation: &str,
        params: impl IntoIterator<Item = (String, String)>,
    ) -> Value {
        let spec = self.get(operation);
        let payload: Map<String, Value> = params
            .into_iter()
            .map(|(key, raw)| {
                let value = match spec.and_then(|s| s.field(&key)) {
                    Some(field) => field.from_text(raw),
                    None => Value::String(raw),
                };
                (key, value)
            })
            .collect();
        Value::Object(payload)
    }

    pub fn endpoint(&self, name: &str) -> Option<&'static EndpointSpec> {
        ENDPOINTS.iter().find(|e| e.name == name)
    }

    /// Validate the filter of a Central System list endpoint. Unknown keys
    /// are rejected.
    pub fn validate_endpoint(
        &self,
        endpoint: &str,
        payload: &Value,
    ) -> Result<Map<String, Value>, CatalogError> {
        let spec = self
            .endpoint(endpoint)
            .ok_or_else(|| CatalogError::UnknownEndpoint(endpoint.to_string()))?;
        validate_fields(endpoint, spec.fields, payload, UnknownKeys::Reject)
    }

    /// Validate a command the Central System is about to send.
    pub fn validate_outbound(
        &self,
        operation: &str,
        payload: &Value,
    ) -> Result<Map<String, Value>, CatalogError> {
        let normalized = self.validate(operation, payload, UnknownKeys::Reject)?;
        match self.get(operation) {
            Some(spec) if !spec.direction.outbound() => Err(CatalogError::WrongDirection {
                operation: operation.to_string(),
                towards: "to a charge point",
            }),
            _ => Ok(normalized),
        }
    }
}

fn validate_fields(
    name: &str,
    fields: &[FieldSpec],
    payload: &Value,
    unknown: UnknownKeys,
) -> Result<Map<String, Value>, CatalogError> {
    let object = match payload {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        _ => return Err(CatalogError::NotAnObject(name.to_string())),
    };

    let mut normalized = Map::with_capacity(object.len());
    for (key, value) in object {
        match fields.iter().find(|f| f.name == key) {
            Some(_) if is_blank(&value) => {}
            Some(_) => {
                normalized.insert(key, value);
            }
            None if unknown == UnknownKeys::Reject => {
                return Err(CatalogError::UnknownField {
                    operation: name.to_string(),
                    field: key,
                });
            }
            None => {
                normalized.insert(key, value);
            }
        }
    }

    if let Some(missing) = fields
        .iter()
        .find(|f| f.required && !normalized.contains_key(f.name))
    {
        return Err(CatalogError::MissingRequiredField {
            operation: name.to_string(),
            field: missing.name.to_string(),
        });
    }

    Ok(normalized)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> &'static OperationCatalog {
        OperationCatalog::global()
    }

    #[test]
    fn every_name_is_indexed_once() {
        let names: Vec<_> = catalog().names().collect();
        assert_eq!(names.len(), OPERATIONS.len());
        for name in names {
            assert!(catalog().contains(name), "{name} missing from index");
        }
        assert_eq!(catalog().operations.len(), OPERATIONS.len());
    }

    #[test]
    fn remote_start_needs_only_id_tag() {
        let ok = catalog()
            .validate("RemoteStartTransaction", &json!({"idTag": "TAG1"}), UnknownKeys::Reject)
            .unwrap();
        assert_eq!(ok.get("idTag"), Some(&json!("TAG1")));

        let err = catalog()
            .validate("RemoteStartTransaction", &json!({}), UnknownKeys::Reject)
            .unwrap_err();
        assert_eq!(
            err,
            CatalogError::MissingRequiredField {
                operation: "RemoteStartTransaction".into(),
                field: "idTag".into(),
            }
        );
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let err = catalog()
            .validate("SelfDestruct", &json!({}), UnknownKeys::Keep)
            .unwrap_err();
        assert_eq!(err, CatalogError::UnknownOperation("SelfDestruct".into()));
    }

    #[test]
    fn first_missing_required_field_is_reported() {
        let err = catalog()
            .validate("ReserveNow", &json!({"connectorId": 1}), UnknownKeys::Keep)
            .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::MissingRequiredField { ref field, .. } if field == "expiryDate"
        ));
    }

    #[test]
    fn blank_optional_fields_are_dropped() {
        let out = catalog()
            .validate(
                "RemoteStartTransaction",
                &json!({"idTag": "T", "connectorId": null, "chargingProfile": ""}),
                UnknownKeys::Reject,
            )
            .unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn blank_required_field_counts_as_missing() {
        let err = catalog()
            .validate("Authorize", &json!({"idTag": ""}), UnknownKeys::Keep)
            .unwrap_err();
        assert!(matches!(err, CatalogError::MissingRequiredField { .. }));
    }

    #[test]
    fn unknown_keys_follow_policy() {
        let payload = json!({"type": "Soft", "force": true});
        let kept = catalog().validate("Reset", &payload, UnknownKeys::Keep).unwrap();
        assert_eq!(kept.get("force"), Some(&json!(true)));

        let err = catalog()
            .validate("Reset", &payload, UnknownKeys::Reject)
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownField { ref field, .. } if field == "force"));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let err = catalog()
            .validate("Heartbeat", &json!([1, 2]), UnknownKeys::Keep)
            .unwrap_err();
        assert_eq!(err, CatalogError::NotAnObject("Heartbeat".into()));
        assert!(catalog().validate("Heartbeat", &Value::Null, UnknownKeys::Keep).is_ok());
    }

    #[test]
    fn outbound_validation_checks_direction() {
        assert!(catalog().validate_outbound("ClearCache", &json!({})).is_ok());
        assert!(catalog()
            .validate_outbound("DataTransfer", &json!({"vendorId": "acme"}))
            .is_ok());
        let err = catalog().validate_outbound("Heartbeat", &json!({})).unwrap_err();
        assert!(matches!(err, CatalogError::WrongDirection { .. }));
    }

    #[test]
    fn text_parameters_are_typed_by_field_kind() {
        let params = [
            ("connectorId".to_string(), "1".to_string()),
            ("idTag".to_string(), "12345".to_string()),
            ("chargingProfile".to_string(), r#"{"chargingProfileId":5}"#.to_string()),
        ];
        assert_eq!(
            catalog().payload_from_text("RemoteStartTransaction", params),
            json!({
                "connectorId": 1,
                "idTag": "12345",
                "chargingProfile": {"chargingProfileId": 5}
            })
        );
    }

    #[test]
    fn unparsable_text_parameters_stay_strings() {
        let params = [
            ("connectorId".to_string(), "first".to_string()),
            ("csChargingProfiles".to_string(), "{oops".to_string()),
            ("extra".to_string(), "7".to_string()),
        ];
        assert_eq!(
            catalog().payload_from_text("SetChargingProfile", params),
            json!({"connectorId": "first", "csChargingProfiles": "{oops", "extra": "7"})
        );
        assert_eq!(
            catalog().payload_from_text("Teleport", [("a".to_string(), "1".to_string())]),
            json!({"a": "1"})
        );
    }

    #[test]
    fn endpoint_filters_are_validated() {
        let filter = catalog()
            .validate_endpoint(
                "TransactionList",
                &json!({"identity": "CP001", "dateFrom": "2024-01-01", "dateTo": ""}),
            )
            .unwrap();
        assert_eq!(Value::Object(filter), json!({"identity": "CP001", "dateFrom": "2024-01-01"}));

        assert!(matches!(
            catalog().validate_endpoint("ReservationList", &json!({})),
            Err(CatalogError::MissingRequiredField { ref field, .. }) if field == "identity"
        ));
        assert!(matches!(
            catalog().validate_endpoint("ReservationList", &json!({"identity": "CP1", "limit": 5})),
            Err(CatalogError::UnknownField { .. })
        ));
        assert_eq!(
            catalog().validate_endpoint("UserList", &json!({})),
            Err(CatalogError::UnknownEndpoint("UserList".into()))
        );
    }
}
