use solarmax_bridge::prelude::*;
use solarmax_bridge::solarmax::{frame, normalize};

use chrono::NaiveDate;

#[test]
fn scales_measurements() {
    let cases = [
        (Field::Kdy, "82", 13.0),
        (Field::Ul1, "910", 232.0),
        (Field::Udc, "BB8", 300.0),
        (Field::Il1, "C8", 2.0),
        (Field::Idc, "1F4", 5.0),
        (Field::Tnf, "1388", 50.0),
        (Field::Pac, "64", 50.0),
        (Field::Pin, "1900", 3200.0),
    ];

    for (field, raw, expected) in cases {
        assert_eq!(
            normalize(field, raw),
            Ok(FieldValue::Float(expected)),
            "{}={}",
            field,
            raw
        );
    }
}

#[test]
fn counters_stay_integers() {
    assert_eq!(normalize(Field::Kt0, "2A0"), Ok(FieldValue::Integer(672)));
    assert_eq!(normalize(Field::Tkk, "2a"), Ok(FieldValue::Integer(42)));
    assert_eq!(normalize(Field::Sal, "3"), Ok(FieldValue::Integer(3)));
    assert_eq!(normalize(Field::Typ, "4E34"), Ok(FieldValue::Integer(20020)));
}

#[test]
fn splits_status() {
    assert_eq!(
        normalize(Field::Sys, "4E24,0"),
        Ok(FieldValue::Status(20004, 0))
    );
    assert_eq!(
        normalize(Field::Sys, "4E24,0").unwrap().as_status(),
        Some((20004, 0))
    );
    assert!(normalize(Field::Sys, "4E24").is_err());
    assert!(normalize(Field::Sys, "4E24,").is_err());
}

#[test]
fn decodes_timestamps() {
    let expected = NaiveDate::from_ymd_opt(2010, 10, 31)
        .unwrap()
        .and_hms_opt(12, 46, 40)
        .unwrap();

    assert_eq!(
        normalize(Field::Sdat, "7DA0A1F,B3B0"),
        Ok(FieldValue::Timestamp(expected))
    );
    assert_eq!(
        normalize(Field::Fdat, "7DA0A1F,B3B0").unwrap().as_timestamp(),
        Some(expected)
    );
}

#[test]
fn rejects_impossible_timestamps() {
    // month 13
    assert!(normalize(Field::Sdat, "7DA0D01,0").is_err());
    // 86400 seconds
    assert!(normalize(Field::Sdat, "7DA0A1F,15180").is_err());
    assert!(normalize(Field::Sdat, "A1F,0").is_err());
    assert!(normalize(Field::Sdat, "7DA0A1F").is_err());
}

#[test]
fn normalize_error_names_field_and_value() {
    let err = normalize(Field::Pac, "XYZ").unwrap_err();

    assert_eq!(err.field, "PAC");
    assert_eq!(err.raw, "XYZ");
    assert!(err.to_string().starts_with("cannot normalize PAC=\"XYZ\""));
}

#[test]
fn bad_field_does_not_fail_response() {
    let raw = frame::decode(b"{01;FB;20|64:KDY=82;UDC=ZZ|06F4}").unwrap();
    let response = Response::from_raw(raw);

    assert_eq!(response.inverter, 1);
    assert_eq!(response.get(Field::Kdy), Some(&FieldValue::Float(13.0)));
    assert_eq!(response.get(Field::Udc), None);
    assert_eq!(response.error(Field::Udc).unwrap().raw, "ZZ");
    assert_eq!(response.errors.len(), 1);
}

#[test]
fn response_serializes_by_field_name() {
    let raw = frame::decode(b"{01;FB;23|64:SYS=4E24,0;SAL=0|075F}").unwrap();
    let response = Response::from_raw(raw);

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        serde_json::json!({
            "inverter": 1,
            "values": { "SAL": 0, "SYS": [20004, 0] }
        })
    );
}
