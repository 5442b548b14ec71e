// Implementation of DataSink for the rdkafka (https://crates.io/crates/rdkafka) library, which sits
// on top of the C librdkafka library.
//
// The target is the topic.  Every record in a batch becomes one message keyed by the client id, and
// flush() waits for the whole batch to be acknowledged (or to fail) before it returns, so the writer
// learns the fate of the batch in the cycle that sent it.  librdkafka's own retries are switched
// off: the writer does not retry failed batches and neither should the sink.

use crate::config::KafkaIni;
use crate::datasink::DataSink;
use crate::document::Document;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::message::DeliveryResult;
use rdkafka::producer::{BaseProducer, BaseRecord, Producer, ProducerContext};
use rdkafka::util::Timeout;

struct DeliveryContext {
    failed: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = ();
    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _: Self::DeliveryOpaque) {
        if let Err((e, _)) = delivery_result {
            self.failed.fetch_add(1, Ordering::Relaxed);
            if let Ok(mut last) = self.last_error.lock() {
                *last = Some(format!("{e:.200}"));
            }
        }
    }
}

pub struct KafkaSink {
    topic: String,
    client_id: String,
    timeout: Duration,
    producer: BaseProducer<DeliveryContext>,
}

impl KafkaSink {
    pub fn open(kafka: &KafkaIni, client_id: &str, topic: &str) -> Result<KafkaSink, String> {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", &kafka.broker_address)
            .set("client.id", client_id)
            .set("message.timeout.ms", format!("{}", kafka.timeout.as_millis()))
            .set("message.send.max.retries", "0");
        if let Some(ref filename) = kafka.ca_file {
            cfg.set("security.protocol", "ssl")
                .set("ssl.ca.location", filename);
        }
        let producer = cfg
            .create_with_context::<DeliveryContext, BaseProducer<DeliveryContext>>(
                DeliveryContext {
                    failed: AtomicUsize::new(0),
                    last_error: Mutex::new(None),
                },
            )
            .map_err(|e| format!("Could not create Kafka producer, error={e}"))?;
        Ok(KafkaSink {
            topic: topic.to_string(),
            client_id: client_id.to_string(),
            timeout: kafka.timeout,
            producer,
        })
    }
}

impl DataSink<Document> for KafkaSink {
    fn name(&self) -> String {
        format!("kafka:{}", self.topic)
    }

    fn flush(&mut self, batch: Vec<Document>) -> Result<(), String> {
        let context = self.producer.context();
        context.failed.store(0, Ordering::Relaxed);

        let mut rejected = 0;
        let mut first_rejection = None;
        for d in &batch {
            let payload = d.to_json();
            let record = BaseRecord::to(&self.topic)
                .payload(&payload)
                .key(&self.client_id);
            if let Err((e, _)) = self.producer.send(record) {
                // Could not even be enqueued in librdkafka, eg its own queue is full.
                rejected += 1;
                if first_rejection.is_none() {
                    first_rejection = Some(format!("{e}"));
                }
            }
        }
        let flushed = self.producer.flush(Timeout::After(self.timeout));

        let failed = context.failed.load(Ordering::Relaxed);
        if let Some(e) = first_rejection {
            return Err(format!("{rejected} of {} records rejected: {e}", batch.len()));
        }
        if failed > 0 {
            let why = match context.last_error.lock() {
                Ok(last) => last.clone().unwrap_or_default(),
                Err(_) => "".to_string(),
            };
            return Err(format!("{failed} of {} records not delivered: {why}", batch.len()));
        }
        flushed.map_err(|e| format!("Flush did not complete: {e}"))
    }

    fn close(&mut self) {
        let _ = self.producer.flush(Timeout::After(self.timeout));
    }
}
