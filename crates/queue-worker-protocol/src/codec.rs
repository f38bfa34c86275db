use crate::{Message, MessageType, ProtocolError, Result, MAX_MESSAGE_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Length-prefixed frame codec for broker messages.
///
/// Frame format: [4-byte length (big-endian)] [1-byte message type] [bincode payload]
/// The length covers the type byte and the payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

const HEADER_LEN: usize = 4;

fn decode_body(msg_type: MessageType, body: &[u8]) -> Result<Message> {
    let message = match msg_type {
        MessageType::Hello => Message::Hello(bincode::deserialize(body)?),
        MessageType::PollTask => Message::PollTask(bincode::deserialize(body)?),
        MessageType::TaskResult => Message::TaskResult(bincode::deserialize(body)?),
        MessageType::Heartbeat => Message::Heartbeat(bincode::deserialize(body)?),
        MessageType::Ack => Message::Ack(bincode::deserialize(body)?),
        MessageType::Nack => Message::Nack(bincode::deserialize(body)?),
        MessageType::SignalWorkflow => Message::SignalWorkflow(bincode::deserialize(body)?),
        MessageType::QueryWorkflow => Message::QueryWorkflow(bincode::deserialize(body)?),
    };
    Ok(message)
}

fn encode_body(message: &Message) -> Result<Vec<u8>> {
    let body = match message {
        Message::Hello(req) => bincode::serialize(req)?,
        Message::PollTask(req) => bincode::serialize(req)?,
        Message::TaskResult(req) => bincode::serialize(req)?,
        Message::Heartbeat(req) => bincode::serialize(req)?,
        Message::Ack(resp) => bincode::serialize(resp)?,
        Message::Nack(resp) => bincode::serialize(resp)?,
        Message::SignalWorkflow(req) => bincode::serialize(req)?,
        Message::QueryWorkflow(req) => bincode::serialize(req)?,
    };
    Ok(body)
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_LEN + 1 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; HEADER_LEN];
        length_bytes.copy_from_slice(&src[..HEADER_LEN]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length == 0 {
            return Err(ProtocolError::EmptyFrame);
        }
        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: MAX_MESSAGE_SIZE,
            });
        }

        if src.len() < HEADER_LEN + length {
            src.reserve(HEADER_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let type_byte = src.get_u8();
        let msg_type =
            MessageType::from_u8(type_byte).ok_or(ProtocolError::InvalidMessageType(type_byte))?;

        let body = src.split_to(length - 1);
        decode_body(msg_type, &body).map(Some)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let body = encode_body(&item)?;

        let total_length = 1 + body.len();
        if total_length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: total_length,
                max: MAX_MESSAGE_SIZE,
            });
        }

        dst.reserve(HEADER_LEN + total_length);
        dst.put_u32(total_length as u32);
        dst.put_u8(item.message_type().as_u8());
        dst.put_slice(&body);

        Ok(())
    }
}
