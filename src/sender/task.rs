use bytes::Bytes;
use std::time::Instant;
use uuid::Uuid;

/// An encoded batch ready for transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub batch_id: String,
    pub body: Bytes,
    pub content_type: &'static str,
    pub content_encoding: Option<&'static str>,
    pub record_count: usize,
}

impl Payload {
    pub fn new(batch_id: impl Into<String>, body: impl Into<Bytes>, content_type: &'static str) -> Self {
        Self {
            batch_id: batch_id.into(),
            body: body.into(),
            content_type,
            content_encoding: None,
            record_count: 0,
        }
    }

    pub fn with_encoding(mut self, encoding: &'static str) -> Self {
        self.content_encoding = Some(encoding);
        self
    }

    pub fn with_record_count(mut self, count: usize) -> Self {
        self.record_count = count;
        self
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

#[derive(Debug)]
pub struct DeliveryTask {
    pub id: Uuid,
    pub payload: Payload,
    pub attempts: u32,
    pub enqueued_at: Instant,
}

impl DeliveryTask {
    pub fn new(payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            attempts: 0,
            enqueued_at: Instant::now(),
        }
    }
}
