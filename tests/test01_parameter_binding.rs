use odbc_middleware::codec::NativeBuffer;
use odbc_middleware::native::{CDataType, ParamDirection, SqlDataType, sql_len_data_at_exec};
use odbc_middleware::prelude::*;
use odbc_middleware::{BytesSource, ParameterBinding};
use serde_json::json;

fn is_validation(err: &OdbcMiddlewareError) -> bool {
    matches!(err, OdbcMiddlewareError::ValidationError(_))
}

#[test]
fn numeric_bounds_fail_with_validation_error() {
    let cases = [
        json!({ "precision": 256, "scale": 0, "sign": true, "value": [1] }),
        json!({ "precision": 10, "scale": 128, "sign": true, "value": [1] }),
        json!({ "precision": 10, "scale": 2, "sign": true, "value": vec![1u8; 17] }),
    ];
    for fields in &cases {
        let err = ParameterBinding::from_numeric_descriptor(fields).unwrap_err();
        assert!(is_validation(&err), "{fields} gave {err:?}");
    }
}

#[test]
fn numeric_at_bounds_is_accepted() {
    let fields = json!({ "precision": 255, "scale": 127, "sign": false, "value": vec![0xffu8; 16] });
    let binding = ParameterBinding::from_numeric_descriptor(&fields).unwrap();
    assert_eq!(binding.precision(), 255);
    assert_eq!(binding.scale(), 127);
    assert_eq!(binding.native_bytes().len(), 19);
}

#[test]
fn numeric_helper_matches_descriptor() {
    let from_helper = make_numeric(12, 2, true, &[0x39, 0x30]).unwrap();
    let binding = ParameterBinding::from_value(&from_helper).unwrap();
    let descriptor = json!({ "precision": 12, "scale": 2, "sign": true, "value": [0x39, 0x30] });
    let from_descriptor = ParameterBinding::from_numeric_descriptor(&descriptor).unwrap();
    assert_eq!(binding.native_bytes(), from_descriptor.native_bytes());
    assert_eq!(binding.decode().unwrap(), from_helper);
}

#[test]
fn output_descriptor_field_errors() {
    let slot = OutputSlot::default();
    let missing_type = json!({ "length": 10, "precision": 0, "scale": 0 });
    let wrong_length = json!({ "paramType": 10, "length": "ten", "precision": 0, "scale": 0 });
    let missing_scale = json!({ "paramType": 10, "length": 10, "precision": 0 });
    for fields in [&missing_type, &wrong_length, &missing_scale] {
        let err = ParameterBinding::from_output_descriptor(fields, Some(slot.clone())).unwrap_err();
        assert!(is_validation(&err), "{fields} gave {err:?}");
    }
    let complete = json!({ "paramType": 10, "length": 10, "precision": 0, "scale": 0 });
    let err = ParameterBinding::from_output_descriptor(&complete, None).unwrap_err();
    assert!(is_validation(&err));
}

#[test]
fn binary_output_declaration_fails_explicitly() {
    let slot = OutputSlot::default();
    for arg in [SqlOutput::as_binary(&slot, 16), SqlOutput::as_varbinary(&slot, 16)] {
        let err = ParameterBinding::from_arg(arg).unwrap_err();
        assert!(matches!(err, OdbcMiddlewareError::Unsupported(_)), "{err:?}");
    }
    assert_eq!(slot.get(), SqlValue::Null);
}

#[test]
fn output_helpers_allocate_by_declared_type() {
    let slot = OutputSlot::default();
    let binding = ParameterBinding::from_arg(SqlOutput::as_nvarchar(&slot, 20)).unwrap();
    assert_eq!(binding.direction(), ParamDirection::Output);
    let desc = binding.bind_descriptor(2);
    assert_eq!(desc.c_type, CDataType::WChar);
    assert_eq!(desc.sql_type, SqlDataType::WVarChar);
    assert_eq!(desc.buffer_length, 40);
    assert_eq!(desc.column_size, 20);

    let numeric = ParameterBinding::from_arg(SqlOutput::as_numeric(&slot, 18, 4)).unwrap();
    let desc = numeric.bind_descriptor(1);
    assert_eq!((desc.column_size, desc.decimal_digits), (18, 4));
}

#[test]
fn dispose_twice_is_harmless() {
    let mut text = ParameterBinding::from_value(&SqlValue::Text("payload".into())).unwrap();
    text.dispose();
    text.dispose();
    assert!(text.is_disposed());
    assert_eq!(text.buffer().buffer_length(), 0);

    let slot = OutputSlot::default();
    let mut output = ParameterBinding::from_arg(SqlOutput::as_varchar(&slot, 8)).unwrap();
    output.dispose();
    output.dispose();
    assert!(output.write_back().is_ok());
    assert_eq!(slot.get(), SqlValue::Null);

    let mut scalar = ParameterBinding::from_value(&SqlValue::BigInt(9)).unwrap();
    scalar.dispose();
    scalar.dispose();
    assert!(matches!(scalar.buffer(), NativeBuffer::BigInt(9)));
}

#[test]
fn inferred_types_follow_values() {
    let cases = [
        (SqlValue::Bool(true), SqlDataType::Bit),
        (SqlValue::Int(1), SqlDataType::Integer),
        (SqlValue::BigInt(1), SqlDataType::BigInt),
        (SqlValue::Double(1.5), SqlDataType::Double),
        (SqlValue::Text("x".into()), SqlDataType::WVarChar),
        (SqlValue::Binary(vec![1]), SqlDataType::VarBinary),
    ];
    for (value, expected) in cases {
        let binding = ParameterBinding::from_value(&value).unwrap();
        assert_eq!(binding.bind_descriptor(1).sql_type, expected, "{value:?}");
    }
}

#[test]
fn null_input_binds_null_indicator() {
    let binding = ParameterBinding::from_input_value(SqlType::Int32, &SqlValue::Null).unwrap();
    assert_eq!(binding.indicator(), odbc_middleware::native::SQL_NULL_DATA);
    assert_eq!(binding.decode().unwrap(), SqlValue::Null);
}

#[test]
fn stream_binds_data_at_execution() {
    let arg = make_input_stream(SqlType::LongNVarChar, BytesSource::new(vec![0; 64]), 64).unwrap();
    let binding = ParameterBinding::from_arg(arg).unwrap();
    let desc = binding.bind_descriptor(3);
    assert_eq!(Some(desc.indicator), sql_len_data_at_exec(64));
    assert_eq!(desc.data_at_exec_token, Some(3));
    assert_eq!(desc.sql_type, SqlDataType::WLongVarChar);

    let err = make_input_stream(SqlType::VarChar, BytesSource::new(Vec::new()), 0).unwrap_err();
    assert!(is_validation(&err));
}

#[test]
fn oversized_stream_length_is_a_validation_error() {
    let length = usize::try_from(isize::MAX).unwrap();
    let arg = make_input_stream(SqlType::LongVarBinary, BytesSource::new(vec![1]), length).unwrap();
    let err = ParameterBinding::from_arg(arg).unwrap_err();
    assert!(is_validation(&err), "{err:?}");
}

#[test]
fn dates_beyond_the_driver_year_range_are_rejected() {
    let far = chrono::NaiveDate::from_ymd_opt(40_000, 1, 1).unwrap();
    let err = ParameterBinding::from_input_value(SqlType::Date, &SqlValue::Date(far)).unwrap_err();
    assert!(is_validation(&err), "{err:?}");
    let stamp = far.and_hms_opt(12, 0, 0).unwrap();
    let err = ParameterBinding::from_value(&SqlValue::Timestamp(stamp)).unwrap_err();
    assert!(is_validation(&err), "{err:?}");
}
