//! # Protobuf <-> JSON Codec
//!
//! The bridge handles every call as proto-JSON. This module implements `tonic::codec::Codec`
//! so that `tonic::server::Grpc` can serve a method straight from that JSON, without generated
//! Rust structs. Connect callers speaking `application/proto` use the same conversions through
//! [`JsonCodec::decode_request`] and [`JsonCodec::encode_response`].
//!
//! ## How it works
//!
//! 1. **Decoder (Proto -> JSON)**:
//!    - Reads the request bytes from the wire.
//!    - Merges them into a `DynamicMessage` of the method's input `MessageDescriptor`.
//!    - Serializes the message with the canonical proto-JSON mapping.
//!
//! 2. **Encoder (JSON -> Proto)**:
//!    - Deserializes the JSON produced by the handler against the output `MessageDescriptor`.
//!      Unknown fields are ignored, since GraphQL results may select more than the message declares.
//!    - Writes the message into the gRPC byte buffer.
//!
//! With [`Encoding::Json`] (`application/grpc+json`) both sides pass the JSON through untouched.
use crate::error::RpcError;
use bytes::{Buf, BufMut, Bytes};
use prost::Message;
use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

/// The message encoding of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Proto,
}

/// A Codec that bridges proto-JSON payloads and the Protobuf binary format of one method.
///
/// It holds the descriptors (schemas) for both the request and the response messages.
#[derive(Debug, Clone)]
pub struct JsonCodec {
    /// Schema for the input message.
    req_desc: MessageDescriptor,
    /// Schema for the output message.
    res_desc: MessageDescriptor,
    /// Wire encoding used by the `Codec` impl.
    encoding: Encoding,
}

impl JsonCodec {
    /// Creates a new `JsonCodec` for binary Protobuf payloads.
    ///
    /// # Arguments
    /// * `req_desc` - Descriptor for the request message type.
    /// * `res_desc` - Descriptor for the response message type.
    pub fn new(req_desc: MessageDescriptor, res_desc: MessageDescriptor) -> Self {
        Self {
            req_desc,
            res_desc,
            encoding: Encoding::Proto,
        }
    }

    /// Sets the wire encoding used when the codec drives a gRPC call.
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Decodes a binary request into proto-JSON.
    pub fn decode_request(&self, bytes: &[u8]) -> Result<Vec<u8>, RpcError> {
        proto_to_json(&self.req_desc, bytes)
    }

    /// Encodes a JSON response into Protobuf bytes.
    ///
    /// A response that does not fit the output message is a bridge-side fault, reported as
    /// `internal`.
    pub fn encode_response(&self, json: &[u8]) -> Result<Vec<u8>, RpcError> {
        json_to_proto(&self.res_desc, json).map(|msg| msg.encode_to_vec())
    }
}

impl Codec for JsonCodec {
    type Encode = Bytes;
    type Decode = Bytes;

    type Encoder = JsonEncoder;
    type Decoder = JsonDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        JsonEncoder {
            desc: self.res_desc.clone(),
            encoding: self.encoding,
        }
    }

    fn decoder(&mut self) -> Self::Decoder {
        JsonDecoder {
            desc: self.req_desc.clone(),
            encoding: self.encoding,
        }
    }
}

/// Responsible for encoding a JSON response into the wire message.
pub struct JsonEncoder {
    desc: MessageDescriptor,
    encoding: Encoding,
}

impl Encoder for JsonEncoder {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        match self.encoding {
            Encoding::Json => dst.put_slice(&item),
            Encoding::Proto => {
                let msg = json_to_proto(&self.desc, &item).map_err(into_status)?;
                msg.encode_raw(dst);
            }
        }

        Ok(())
    }
}

/// Responsible for decoding the wire message into a JSON request.
pub struct JsonDecoder {
    desc: MessageDescriptor,
    encoding: Encoding,
}

impl Decoder for JsonDecoder {
    type Item = Bytes;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let json = match self.encoding {
            Encoding::Json => src.copy_to_bytes(src.remaining()),
            Encoding::Proto => proto_to_json(&self.desc, src)
                .map(Bytes::from)
                .map_err(into_status)?,
        };

        Ok(Some(json))
    }
}

fn proto_to_json(desc: &MessageDescriptor, bytes: impl Buf) -> Result<Vec<u8>, RpcError> {
    let mut msg = DynamicMessage::new(desc.clone());
    msg.merge(bytes).map_err(|e| {
        RpcError::invalid_argument(format!("Failed to decode Protobuf bytes: {e}"))
    })?;

    serde_json::to_vec(&msg)
        .map_err(|e| RpcError::invalid_argument(format!("Failed to map request to JSON: {e}")))
}

fn json_to_proto(desc: &MessageDescriptor, json: &[u8]) -> Result<DynamicMessage, RpcError> {
    let options = DeserializeOptions::new().deny_unknown_fields(false);
    let mut deserializer = serde_json::Deserializer::from_slice(json);

    DynamicMessage::deserialize_with_options(desc.clone(), &mut deserializer, &options)
        .and_then(|msg| deserializer.end().map(|()| msg))
        .map_err(|e| {
            tracing::error!(
                message = desc.full_name(),
                error = %e,
                "Response does not match the output message"
            );
            RpcError::internal_server_error()
        })
}

fn into_status(err: RpcError) -> Status {
    Status::new(err.code(), err.message())
}
