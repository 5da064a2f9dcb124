use serde::Serialize;
use tracing::warn;

use crate::{
    hal::SensorSample,
    rate_limit::AlertCategory,
    types::{EmailPayload, Notification, NotificationKind},
};

/// Side effect requested by a component during a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Publish {
        topic: &'static str,
        payload: String,
        retain: bool,
    },
    Alert(Notification),
    Email {
        category: AlertCategory,
        payload: EmailPayload,
    },
}

/// Per-tick queue of outbound effects, drained by the app state machine.
#[derive(Debug, Default)]
pub struct Outbox {
    items: Vec<Outbound>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish<T: Serialize>(&mut self, topic: &'static str, body: &T, retain: bool) {
        match serde_json::to_string(body) {
            Ok(payload) => self.items.push(Outbound::Publish {
                topic,
                payload,
                retain,
            }),
            Err(err) => warn!("dropping publish to {topic}: serialization failed: {err}"),
        }
    }

    pub fn alert(&mut self, kind: NotificationKind, message: impl Into<String>) {
        self.items.push(Outbound::Alert(Notification {
            kind,
            message: message.into(),
            humidity: None,
            temperature: None,
        }));
    }

    pub fn alert_with_sample(
        &mut self,
        kind: NotificationKind,
        message: impl Into<String>,
        sample: Option<SensorSample>,
    ) {
        let sample = sample.filter(SensorSample::is_valid);
        self.items.push(Outbound::Alert(Notification {
            kind,
            message: message.into(),
            humidity: sample.map(|s| s.humidity),
            temperature: sample.map(|s| s.temperature),
        }));
    }

    pub fn email(&mut self, category: AlertCategory, payload: EmailPayload) {
        self.items.push(Outbound::Email { category, payload });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn take(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.items)
    }

    pub fn alerts(&self) -> impl Iterator<Item = &Notification> {
        self.items.iter().filter_map(|item| match item {
            Outbound::Alert(notification) => Some(notification),
            _ => None,
        })
    }

    pub fn publishes_to<'a>(&'a self, topic: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.items.iter().filter_map(move |item| match item {
            Outbound::Publish {
                topic: published,
                payload,
                ..
            } if *published == topic => Some(payload.as_str()),
            _ => None,
        })
    }

    pub fn emails(&self) -> impl Iterator<Item = (AlertCategory, &EmailPayload)> {
        self.items.iter().filter_map(|item| match item {
            Outbound::Email { category, payload } => Some((*category, payload)),
            _ => None,
        })
    }
}
