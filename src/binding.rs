//! Parameter bindings: one native buffer per statement parameter plus the bookkeeping
//! `SQLBindParameter` needs.

use std::fmt;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use crate::codec::{self, Encoded, NativeBuffer};
use crate::driver::BindDescriptor;
use crate::error::OdbcMiddlewareError;
use crate::native::{CDataType, ParamDirection, SqlDataType, sql_len_data_at_exec};
use crate::types::{NumericValue, SqlType, SqlValue};

/// Caller-visible slot an output parameter is written back into once the query succeeds.
#[derive(Clone, Default)]
pub struct OutputSlot {
    value: Arc<Mutex<SqlValue>>,
}

impl OutputSlot {
    #[must_use]
    pub fn new(initial: SqlValue) -> Self {
        Self {
            value: Arc::new(Mutex::new(initial)),
        }
    }

    #[must_use]
    pub fn get(&self) -> SqlValue {
        self.lock().clone()
    }

    pub(crate) fn set(&self, value: SqlValue) {
        *self.lock() = value;
    }

    fn lock(&self) -> MutexGuard<'_, SqlValue> {
        match self.value.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for OutputSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OutputSlot").field(&*self.lock()).finish()
    }
}

/// Produces the payload of a parameter the driver asks for while the statement waits.
///
/// Called once per data request on a blocking thread, never on the foreground loop, so
/// implementations may block on I/O. Returning `Ok(None)` ends the stream.
pub trait StreamSource: Send {
    /// # Errors
    /// Any error aborts the query with [`OdbcMiddlewareError::StreamError`].
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, OdbcMiddlewareError>;
}

impl<F> StreamSource for F
where
    F: FnMut() -> Result<Option<Vec<u8>>, OdbcMiddlewareError> + Send,
{
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, OdbcMiddlewareError> {
        self()
    }
}

/// Stream source over an in-memory payload, delivered in one piece.
#[derive(Debug)]
pub struct BytesSource(Option<Vec<u8>>);

impl BytesSource {
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self(Some(payload))
    }
}

impl StreamSource for BytesSource {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, OdbcMiddlewareError> {
        Ok(self.0.take())
    }
}

/// Stream source over any reader, delivered in `chunk_size` pieces.
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: R,
    chunk_size: usize,
}

impl<R: Read + Send> ReaderSource<R> {
    #[must_use]
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
        }
    }
}

impl<R: Read + Send> StreamSource for ReaderSource<R> {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, OdbcMiddlewareError> {
        let mut chunk = vec![0u8; self.chunk_size];
        let read = self
            .reader
            .read(&mut chunk)
            .map_err(|err| OdbcMiddlewareError::StreamError(err.to_string()))?;
        if read == 0 {
            return Ok(None);
        }
        chunk.truncate(read);
        Ok(Some(chunk))
    }
}

/// Progress of a data-at-execution parameter.
struct ParamStream {
    source: Box<dyn StreamSource>,
    length: usize,
    sent: usize,
    pending: Option<Vec<u8>>,
    finished: bool,
    failure: Option<OdbcMiddlewareError>,
}

impl ParamStream {
    fn remaining(&self) -> usize {
        let queued = self.pending.as_ref().map_or(0, Vec::len);
        self.length.saturating_sub(self.sent + queued)
    }
}

/// What a caller passes for one statement parameter.
pub enum SqlArg {
    /// Plain value; the SQL type is inferred from the value.
    Value(SqlValue),
    /// Plain value bound as an explicit SQL type.
    Typed(SqlType, SqlValue),
    /// Structured numeric descriptor: `precision`, `scale`, `sign`, `value`.
    Numeric(JsonValue),
    /// Structured output descriptor: `paramType`, `length`, `precision`, `scale`, plus the slot
    /// that receives the value.
    Output {
        descriptor: JsonValue,
        reference: Option<OutputSlot>,
    },
    /// Long value supplied piecewise while the statement waits for it.
    Stream {
        sql_type: SqlType,
        source: Box<dyn StreamSource>,
        length: usize,
    },
}

impl From<SqlValue> for SqlArg {
    fn from(value: SqlValue) -> Self {
        SqlArg::Value(value)
    }
}

impl fmt::Debug for SqlArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlArg::Value(value) => f.debug_tuple("Value").field(value).finish(),
            SqlArg::Typed(ty, value) => f.debug_tuple("Typed").field(ty).field(value).finish(),
            SqlArg::Numeric(desc) => f.debug_tuple("Numeric").field(desc).finish(),
            SqlArg::Output {
                descriptor,
                reference,
            } => f
                .debug_struct("Output")
                .field("descriptor", descriptor)
                .field("reference", reference)
                .finish(),
            SqlArg::Stream {
                sql_type, length, ..
            } => f
                .debug_struct("Stream")
                .field("sql_type", sql_type)
                .field("length", length)
                .finish(),
        }
    }
}

/// Build a streamed input argument.
///
/// # Errors
/// Returns `ValidationError` unless `sql_type` is a long text or binary type.
pub fn make_input_stream(
    sql_type: SqlType,
    source: impl StreamSource + 'static,
    length: usize,
) -> Result<SqlArg, OdbcMiddlewareError> {
    if !sql_type.is_long() {
        return Err(OdbcMiddlewareError::validation(format!(
            "{sql_type:?} cannot be streamed"
        )));
    }
    Ok(SqlArg::Stream {
        sql_type,
        source: Box::new(source),
        length,
    })
}

/// Builders for output parameter arguments.
pub struct SqlOutput;

impl SqlOutput {
    fn declare(ty: SqlType, reference: &OutputSlot, length: u32, precision: u32, scale: u32) -> SqlArg {
        SqlArg::Output {
            descriptor: json!({
                "paramType": ty.code(),
                "length": length,
                "precision": precision,
                "scale": scale,
            }),
            reference: Some(reference.clone()),
        }
    }

    #[must_use]
    pub fn as_bit(reference: &OutputSlot) -> SqlArg {
        Self::declare(SqlType::Bit, reference, 0, 0, 0)
    }

    #[must_use]
    pub fn as_tinyint(reference: &OutputSlot) -> SqlArg {
        Self::declare(SqlType::TinyInt, reference, 0, 0, 0)
    }

    #[must_use]
    pub fn as_smallint(reference: &OutputSlot) -> SqlArg {
        Self::declare(SqlType::SmallInt, reference, 0, 0, 0)
    }

    #[must_use]
    pub fn as_int(reference: &OutputSlot) -> SqlArg {
        Self::declare(SqlType::Int32, reference, 0, 0, 0)
    }

    #[must_use]
    pub fn as_bigint(reference: &OutputSlot) -> SqlArg {
        Self::declare(SqlType::BigInt, reference, 0, 0, 0)
    }

    #[must_use]
    pub fn as_real(reference: &OutputSlot) -> SqlArg {
        Self::declare(SqlType::Real, reference, 0, 0, 0)
    }

    #[must_use]
    pub fn as_char(reference: &OutputSlot, length: u32) -> SqlArg {
        Self::declare(SqlType::Char, reference, length, 0, 0)
    }

    #[must_use]
    pub fn as_nchar(reference: &OutputSlot, length: u32) -> SqlArg {
        Self::declare(SqlType::NChar, reference, length, 0, 0)
    }

    #[must_use]
    pub fn as_varchar(reference: &OutputSlot, length: u32) -> SqlArg {
        Self::declare(SqlType::VarChar, reference, length, 0, 0)
    }

    #[must_use]
    pub fn as_nvarchar(reference: &OutputSlot, length: u32) -> SqlArg {
        Self::declare(SqlType::NVarChar, reference, length, 0, 0)
    }

    #[must_use]
    pub fn as_binary(reference: &OutputSlot, length: u32) -> SqlArg {
        Self::declare(SqlType::Binary, reference, length, 0, 0)
    }

    #[must_use]
    pub fn as_varbinary(reference: &OutputSlot, length: u32) -> SqlArg {
        Self::declare(SqlType::VarBinary, reference, length, 0, 0)
    }

    #[must_use]
    pub fn as_date(reference: &OutputSlot) -> SqlArg {
        Self::declare(SqlType::Date, reference, 0, 0, 0)
    }

    #[must_use]
    pub fn as_timestamp(reference: &OutputSlot, scale: u32) -> SqlArg {
        Self::declare(SqlType::Timestamp, reference, 0, 0, scale)
    }

    #[must_use]
    pub fn as_numeric(reference: &OutputSlot, precision: u32, scale: u32) -> SqlArg {
        Self::declare(SqlType::Numeric, reference, 0, precision, scale)
    }
}

#[derive(Debug, Deserialize)]
struct NumericDescriptor {
    precision: u32,
    scale: u32,
    sign: bool,
    value: Vec<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputDescriptor {
    param_type: u32,
    length: u32,
    precision: u32,
    scale: u32,
}

fn parse_descriptor<T: for<'de> Deserialize<'de>>(
    kind: &str,
    fields: &JsonValue,
) -> Result<T, OdbcMiddlewareError> {
    T::deserialize(fields)
        .map_err(|err| OdbcMiddlewareError::validation(format!("invalid {kind} descriptor: {err}")))
}

/// One bound statement parameter.
pub struct ParameterBinding {
    declared: SqlType,
    direction: ParamDirection,
    buffer: NativeBuffer,
    column_size: usize,
    precision: u32,
    decimal_digits: i16,
    indicator: isize,
    output: Option<OutputSlot>,
    stream: Option<ParamStream>,
    disposed: bool,
}

impl fmt::Debug for ParameterBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterBinding")
            .field("declared", &self.declared)
            .field("direction", &self.direction)
            .field("c_type", &self.buffer.c_type())
            .field("sql_type", &self.buffer.sql_type())
            .field("column_size", &self.column_size)
            .field("decimal_digits", &self.decimal_digits)
            .field("indicator", &self.indicator)
            .field("streamed", &self.stream.is_some())
            .finish_non_exhaustive()
    }
}

impl ParameterBinding {
    fn from_encoded(declared: SqlType, direction: ParamDirection, encoded: Encoded) -> Self {
        let precision = u32::try_from(encoded.column_size).unwrap_or(u32::MAX);
        Self {
            declared,
            direction,
            buffer: encoded.buffer,
            column_size: encoded.column_size,
            precision,
            decimal_digits: encoded.decimal_digits,
            indicator: encoded.indicator,
            output: None,
            stream: None,
            disposed: false,
        }
    }

    /// Validate and encode a regular input argument of the declared type.
    ///
    /// # Errors
    /// Returns `ValidationError` when the value does not fit the type.
    pub fn from_input_value(ty: SqlType, value: &SqlValue) -> Result<Self, OdbcMiddlewareError> {
        let encoded = codec::encode(ty, value)?;
        Ok(Self::from_encoded(ty, ParamDirection::Input, encoded))
    }

    /// Encode an input argument, inferring the SQL type from the value.
    ///
    /// # Errors
    /// Returns `ValidationError` when the value cannot be encoded.
    pub fn from_value(value: &SqlValue) -> Result<Self, OdbcMiddlewareError> {
        let ty = match value {
            SqlValue::Null => SqlType::Null,
            SqlValue::Bool(_) => SqlType::Bit,
            SqlValue::Int(_) => SqlType::Int32,
            SqlValue::BigInt(_) => SqlType::BigInt,
            SqlValue::Double(_) => SqlType::Real,
            SqlValue::Text(_) => SqlType::NVarChar,
            SqlValue::Binary(_) => SqlType::VarBinary,
            SqlValue::Date(_) => SqlType::Date,
            SqlValue::Timestamp(_) => SqlType::Timestamp,
            SqlValue::Numeric(_) => SqlType::Numeric,
        };
        Self::from_input_value(ty, value)
    }

    /// Build a fixed-point numeric input from its structured descriptor.
    ///
    /// # Errors
    /// Returns `ValidationError` when a field is missing or of the wrong kind, or when
    /// precision, scale or magnitude length exceed what the driver struct holds.
    pub fn from_numeric_descriptor(fields: &JsonValue) -> Result<Self, OdbcMiddlewareError> {
        let desc: NumericDescriptor = parse_descriptor("numeric", fields)?;
        let numeric = NumericValue::new(desc.precision, desc.scale, desc.sign, desc.value)?;
        Self::from_input_value(SqlType::Numeric, &SqlValue::Numeric(numeric))
    }

    /// Declare an output parameter that is written back into `reference` after execution.
    ///
    /// # Errors
    /// Returns `ValidationError` when a field is missing or of the wrong kind, or the reference
    /// is absent, and `Unsupported` for BINARY/VARBINARY outputs.
    pub fn from_output_descriptor(
        fields: &JsonValue,
        reference: Option<OutputSlot>,
    ) -> Result<Self, OdbcMiddlewareError> {
        let desc: OutputDescriptor = parse_descriptor("output", fields)?;
        let reference = reference.ok_or_else(|| {
            OdbcMiddlewareError::validation("output descriptor has no reference slot")
        })?;
        let ty = SqlType::try_from(desc.param_type)?;
        let length = usize::try_from(desc.length)
            .map_err(|_| OdbcMiddlewareError::validation("output length does not fit in memory"))?;
        let encoded = codec::allocate_output(ty, length, desc.precision, desc.scale)?;
        let mut binding = Self::from_encoded(ty, ParamDirection::Output, encoded);
        binding.precision = desc.precision;
        binding.output = Some(reference);
        Ok(binding)
    }

    /// Declare a long input whose `length` bytes are supplied while the statement waits.
    ///
    /// # Errors
    /// Returns `ValidationError` unless `ty` is a long text or binary type, or when `length`
    /// cannot be announced to the driver.
    pub fn from_stream(
        ty: SqlType,
        source: Box<dyn StreamSource>,
        length: usize,
    ) -> Result<Self, OdbcMiddlewareError> {
        let (sql_type, c_type) = match ty {
            SqlType::LongVarChar => (SqlDataType::LongVarChar, CDataType::Char),
            SqlType::LongNVarChar => (SqlDataType::WLongVarChar, CDataType::WChar),
            SqlType::LongVarBinary => (SqlDataType::LongVarBinary, CDataType::Binary),
            other => {
                return Err(OdbcMiddlewareError::validation(format!(
                    "{other:?} cannot be streamed"
                )));
            }
        };
        let indicator = sql_len_data_at_exec(length).ok_or_else(|| {
            OdbcMiddlewareError::validation(format!("stream length {length} is too large to bind"))
        })?;
        let encoded = Encoded {
            buffer: NativeBuffer::DataAtExec { sql_type, c_type },
            column_size: length,
            decimal_digits: 0,
            indicator,
        };
        let mut binding = Self::from_encoded(ty, ParamDirection::Input, encoded);
        binding.stream = Some(ParamStream {
            source,
            length,
            sent: 0,
            pending: None,
            finished: false,
            failure: None,
        });
        Ok(binding)
    }

    /// Build a binding from whatever the caller passed.
    ///
    /// # Errors
    /// Propagates the validation of the matching constructor.
    pub fn from_arg(arg: SqlArg) -> Result<Self, OdbcMiddlewareError> {
        match arg {
            SqlArg::Value(value) => Self::from_value(&value),
            SqlArg::Typed(ty, value) => Self::from_input_value(ty, &value),
            SqlArg::Numeric(fields) => Self::from_numeric_descriptor(&fields),
            SqlArg::Output {
                descriptor,
                reference,
            } => Self::from_output_descriptor(&descriptor, reference),
            SqlArg::Stream {
                sql_type,
                source,
                length,
            } => Self::from_stream(sql_type, source, length),
        }
    }

    /// Procedure return code, bound ahead of the declared parameters.
    pub(crate) fn return_value() -> Self {
        let encoded = Encoded {
            buffer: NativeBuffer::ReturnCode(0),
            column_size: 0,
            decimal_digits: 0,
            indicator: 0,
        };
        Self::from_encoded(SqlType::SmallInt, ParamDirection::Output, encoded)
    }

    #[must_use]
    pub fn declared_type(&self) -> SqlType {
        self.declared
    }

    #[must_use]
    pub fn direction(&self) -> ParamDirection {
        self.direction
    }

    #[must_use]
    pub fn buffer(&self) -> &NativeBuffer {
        &self.buffer
    }

    #[must_use]
    pub fn column_size(&self) -> usize {
        self.column_size
    }

    #[must_use]
    pub fn precision(&self) -> u32 {
        self.precision
    }

    #[must_use]
    pub fn scale(&self) -> i16 {
        self.decimal_digits
    }

    #[must_use]
    pub fn indicator(&self) -> isize {
        self.indicator
    }

    #[must_use]
    pub fn is_streamed(&self) -> bool {
        self.stream.is_some()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// What `SQLBindParameter` receives for this binding at `ordinal`.
    #[must_use]
    pub fn bind_descriptor(&self, ordinal: u16) -> BindDescriptor {
        BindDescriptor {
            ordinal,
            direction: self.direction,
            c_type: self.buffer.c_type(),
            sql_type: self.buffer.sql_type(),
            column_size: self.column_size,
            decimal_digits: self.decimal_digits,
            buffer_length: self.buffer.buffer_length(),
            indicator: self.indicator,
            data_at_exec_token: self.stream.as_ref().map(|_| ordinal),
        }
    }

    /// Current buffer contents, as the driver reads them.
    #[must_use]
    pub fn native_bytes(&self) -> Vec<u8> {
        self.buffer.to_bytes()
    }

    /// Driver-side write of an output value: raw buffer image plus length-or-indicator.
    ///
    /// # Errors
    /// Returns an error if the image does not fit this buffer's type.
    pub fn write_native(&mut self, bytes: &[u8], indicator: isize) -> Result<(), OdbcMiddlewareError> {
        self.buffer.load_bytes(bytes)?;
        self.indicator = indicator;
        Ok(())
    }

    /// Driver-side write of an output value given as a caller value.
    ///
    /// # Errors
    /// Returns an error if the value does not fit this buffer's type.
    pub fn store_output(&mut self, value: &SqlValue) -> Result<(), OdbcMiddlewareError> {
        self.indicator = self.buffer.store_value(value)?;
        Ok(())
    }

    /// Decode the buffer with the same path used for result columns.
    ///
    /// # Errors
    /// Propagates decode failures.
    pub fn decode(&self) -> Result<SqlValue, OdbcMiddlewareError> {
        self.buffer.decode(self.indicator)
    }

    /// Store the decoded output value into the caller's slot. No-op for input bindings.
    ///
    /// # Errors
    /// Propagates decode failures; the slot is left untouched in that case.
    pub fn write_back(&self) -> Result<(), OdbcMiddlewareError> {
        if let Some((slot, value)) = self.output_value()? {
            slot.set(value);
        }
        Ok(())
    }

    /// Decoded output value paired with the slot it belongs in, without storing it yet.
    pub(crate) fn output_value(
        &self,
    ) -> Result<Option<(&OutputSlot, SqlValue)>, OdbcMiddlewareError> {
        if !self.direction.is_output() {
            return Ok(None);
        }
        match &self.output {
            Some(slot) => Ok(Some((slot, self.decode()?))),
            None => Ok(None),
        }
    }

    /// Release owned buffers and the slot reference. Safe to call any number of times.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let released = self.buffer.release();
        self.output = None;
        self.stream = None;
        self.disposed = true;
        if released > 0 {
            tracing::trace!(released, "released parameter buffer");
        }
    }

    /// Ask the caller's source for the next piece of streamed payload.
    pub(crate) fn supply_stream_chunk(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        if stream.finished || stream.pending.is_some() || stream.failure.is_some() {
            return;
        }
        match stream.source.next_chunk() {
            Ok(Some(mut chunk)) if !chunk.is_empty() => {
                chunk.truncate(stream.remaining());
                stream.pending = Some(chunk);
            }
            Ok(_) => stream.finished = true,
            Err(err @ OdbcMiddlewareError::StreamError(_)) => stream.failure = Some(err),
            Err(err) => {
                stream.failure = Some(OdbcMiddlewareError::StreamError(err.to_string()));
            }
        }
    }

    /// Background step: hand out the chunk the caller supplied, if any.
    pub(crate) fn take_stream_chunk(&mut self) -> Result<Option<Vec<u8>>, OdbcMiddlewareError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(OdbcMiddlewareError::ExecutionError(
                "driver requested data for a parameter that is not streamed".into(),
            ));
        };
        if let Some(err) = stream.failure.take() {
            return Err(err);
        }
        Ok(stream.pending.take())
    }

    /// Record `len` bytes as delivered to the driver.
    pub(crate) fn mark_stream_sent(&mut self, len: usize) {
        if let Some(stream) = self.stream.as_mut() {
            stream.sent += len;
            if stream.sent >= stream.length {
                stream.finished = true;
            }
        }
    }

    pub(crate) fn stream_finished(&self) -> bool {
        self.stream.as_ref().is_none_or(|stream| stream.finished)
    }
}

/// Bound buffers lent to the driver for one call, addressed by 1-based ordinal.
pub struct BoundParameters<'a> {
    return_value: Option<&'a mut ParameterBinding>,
    params: &'a mut [ParameterBinding],
}

impl<'a> BoundParameters<'a> {
    pub(crate) fn new(
        return_value: Option<&'a mut ParameterBinding>,
        params: &'a mut [ParameterBinding],
    ) -> Self {
        Self {
            return_value,
            params,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len() + usize::from(self.return_value.is_some())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any parameter supplies its payload at execution time.
    #[must_use]
    pub fn has_streams(&self) -> bool {
        self.params.iter().any(ParameterBinding::is_streamed)
    }

    /// Binding at `ordinal`, counting the return value as ordinal 1 when present.
    pub fn get_mut(&mut self, ordinal: u16) -> Option<&mut ParameterBinding> {
        let index = usize::from(ordinal).checked_sub(1)?;
        match self.return_value.as_deref_mut() {
            Some(rv) if index == 0 => Some(rv),
            Some(_) => self.params.get_mut(index - 1),
            None => self.params.get_mut(index),
        }
    }
}
