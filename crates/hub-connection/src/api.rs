//! Typed wrappers for the hub's commands.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use homelink_protocol::EntityState;
use homelink_protocol::constants::{
    CMD_AREA_REGISTRY_LIST, CMD_DEVICE_REGISTRY_LIST, CMD_ENTITY_REGISTRY_LIST,
    CMD_FLOOR_REGISTRY_LIST, CMD_GET_CONFIG, CMD_GET_SERVICES, CMD_GET_STATES,
    CMD_LABEL_REGISTRY_LIST, CMD_PING, MSG_PONG,
};
use homelink_protocol::messages::{
    CallServiceCommand, SimpleCommand, SubscribeEventsCommand, SubscribeTriggerCommand,
    UnsubscribeEventsCommand,
};
use homelink_protocol::types::{Area, Device, EntityRegistration, Floor, HubConfig, Label};

use crate::connection::{Connection, check_success};
use crate::error::ConnectionError;

impl Connection {
    pub async fn get_states(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<EntityState>, ConnectionError> {
        self.list(CMD_GET_STATES, cancel).await
    }

    pub async fn get_config(&self, cancel: &CancellationToken) -> Result<HubConfig, ConnectionError> {
        Ok(self
            .send_and_parse(&SimpleCommand::new(CMD_GET_CONFIG), cancel)
            .await?
            .unwrap_or_default())
    }

    /// Service descriptions keyed by domain, then service name.
    pub async fn get_services(&self, cancel: &CancellationToken) -> Result<Value, ConnectionError> {
        Ok(self
            .send_and_get_raw(&SimpleCommand::new(CMD_GET_SERVICES), cancel)
            .await?
            .unwrap_or(Value::Null))
    }

    /// Calls a service and returns its response payload, if any.
    pub async fn call_service(
        &self,
        command: &CallServiceCommand,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, ConnectionError> {
        self.send_and_get_raw(command, cancel).await
    }

    /// Subscribes to hub events, all of them when `event_type` is `None`.
    ///
    /// Returns the subscription id. Events arrive on [`Connection::events`].
    pub async fn subscribe_events(
        &self,
        event_type: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<u64, ConnectionError> {
        let command = SubscribeEventsCommand {
            event_type: event_type.map(str::to_string),
        };
        self.subscribe(&command, cancel).await
    }

    /// Subscribes to an automation trigger. Returns the subscription id,
    /// which matching events carry as their message id.
    pub async fn subscribe_trigger(
        &self,
        trigger: Value,
        cancel: &CancellationToken,
    ) -> Result<u64, ConnectionError> {
        self.subscribe(&SubscribeTriggerCommand { trigger }, cancel)
            .await
    }

    pub async fn unsubscribe_events(
        &self,
        subscription: u64,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        self.send_and_get_raw(&UnsubscribeEventsCommand { subscription }, cancel)
            .await
            .map(|_| ())
    }

    pub async fn get_areas(&self, cancel: &CancellationToken) -> Result<Vec<Area>, ConnectionError> {
        self.list(CMD_AREA_REGISTRY_LIST, cancel).await
    }

    pub async fn get_devices(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Device>, ConnectionError> {
        self.list(CMD_DEVICE_REGISTRY_LIST, cancel).await
    }

    pub async fn get_entities(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<EntityRegistration>, ConnectionError> {
        self.list(CMD_ENTITY_REGISTRY_LIST, cancel).await
    }

    pub async fn get_floors(&self, cancel: &CancellationToken) -> Result<Vec<Floor>, ConnectionError> {
        self.list(CMD_FLOOR_REGISTRY_LIST, cancel).await
    }

    pub async fn get_labels(&self, cancel: &CancellationToken) -> Result<Vec<Label>, ConnectionError> {
        self.list(CMD_LABEL_REGISTRY_LIST, cancel).await
    }

    /// Sends `ping` and waits up to `timeout` for the matching `pong`.
    ///
    /// The hub answers pings with a `pong` message rather than a result, so
    /// the ping bypasses result supervision.
    pub async fn ping(&self, timeout: Duration) -> Result<bool, ConnectionError> {
        let mut messages = self.subscribe_messages();
        let id = self
            .send_unsupervised(&SimpleCommand::new(CMD_PING))
            .await?;

        let pong = tokio::time::timeout(timeout, async {
            loop {
                match messages.recv().await {
                    Ok(msg) if msg.msg_type == MSG_PONG && msg.id == Some(id) => return true,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return false,
                }
            }
        })
        .await;
        Ok(pong.unwrap_or(false))
    }

    async fn list<T: serde::de::DeserializeOwned>(
        &self,
        command_type: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, ConnectionError> {
        Ok(self
            .send_and_parse(&SimpleCommand::new(command_type), cancel)
            .await?
            .unwrap_or_default())
    }

    async fn subscribe<C: homelink_protocol::Command>(
        &self,
        command: &C,
        cancel: &CancellationToken,
    ) -> Result<u64, ConnectionError> {
        let result = self.send_and_await_result(command, cancel).await?;
        Ok(check_success(command.command_type(), result)?.id)
    }
}
