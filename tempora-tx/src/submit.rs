//! Transaction submission.
//!
//! A writer never puts documents inline in a transaction record: each
//! attached document becomes a doc-topic record keyed by its content hash,
//! and only once every doc send is acknowledged is the single tx record
//! produced. The log assigns the transaction its id (the record offset)
//! and time (the record timestamp).

use bytes::Bytes;
use tracing::debug;

use tempora_core::canonical;
use tempora_core::error::Result;
use tempora_core::types::{ContentHash, Document, EntityId, Timestamp, TxOp};
use tempora_log::Producer;

/// A submitted operation: the document-carrying counterpart of [`TxOp`].
#[derive(Debug, Clone)]
pub enum SubmitOp {
    Put {
        doc: Document,
        business_time: Option<Timestamp>,
    },
    Delete {
        eid: EntityId,
        business_time: Option<Timestamp>,
    },
    Cas {
        expected: ContentHash,
        doc: Document,
        business_time: Option<Timestamp>,
    },
    Evict {
        eid: EntityId,
    },
}

/// Outcome of a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_id: u64,
    pub tx_time: Timestamp,
}

/// Thread-safe transaction writer; any number of callers may submit
/// concurrently, ordering is whatever the log's single partition yields.
#[derive(Clone)]
pub struct TxSubmitter {
    producer: Producer,
    tx_topic: String,
    doc_topic: String,
}

impl TxSubmitter {
    pub fn new(producer: Producer, tx_topic: String, doc_topic: String) -> Self {
        Self {
            producer,
            tx_topic,
            doc_topic,
        }
    }

    /// Submit a transaction; resolves once the tx record is durable on the
    /// log. Acknowledgement of every doc send precedes the tx send.
    pub async fn submit_tx(&self, ops: Vec<SubmitOp>) -> Result<TxReceipt> {
        let mut tx_ops = Vec::with_capacity(ops.len());
        let mut docs: Vec<(ContentHash, Vec<u8>)> = Vec::new();

        for op in ops {
            match op {
                SubmitOp::Put { doc, business_time } => {
                    let bytes = doc.canonical_bytes()?;
                    let content_hash = ContentHash::of_bytes(&bytes);
                    tx_ops.push(TxOp::Put {
                        eid: doc.id,
                        content_hash,
                        business_time,
                    });
                    docs.push((content_hash, bytes));
                }
                SubmitOp::Delete { eid, business_time } => {
                    tx_ops.push(TxOp::Delete { eid, business_time });
                }
                SubmitOp::Cas {
                    expected,
                    doc,
                    business_time,
                } => {
                    let bytes = doc.canonical_bytes()?;
                    let new = ContentHash::of_bytes(&bytes);
                    tx_ops.push(TxOp::Cas {
                        eid: doc.id,
                        expected,
                        new,
                        business_time,
                    });
                    docs.push((new, bytes));
                }
                SubmitOp::Evict { eid } => {
                    tx_ops.push(TxOp::Evict { eid });
                }
            }
        }

        for (hash, bytes) in docs {
            self.producer
                .produce(
                    &self.doc_topic,
                    Some(Bytes::copy_from_slice(hash.as_bytes())),
                    Bytes::from(bytes),
                )
                .await?;
        }

        let payload = canonical::freeze(&tx_ops)?;
        let meta = self
            .producer
            .produce(&self.tx_topic, None, Bytes::from(payload))
            .await?;

        debug!("submitted tx {} with {} ops", meta.offset, tx_ops.len());
        Ok(TxReceipt {
            tx_id: meta.offset,
            tx_time: meta.timestamp,
        })
    }
}
