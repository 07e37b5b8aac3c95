// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Register backend for one Solis cloud device
//!
//! Every write reads the register first and is skipped when the device
//! already holds the value. The current value travels along with the write
//! as `yuanzhi` so the cloud can reject writes made against stale state.

use crate::cache::{RegisterCache, values_equal};
use crate::client::{
    PATH_CONTROL, PATH_INVERTER_DETAIL, PATH_INVERTER_LIST, PATH_READ, PATH_READ_BATCH,
    SolisClient,
};
use crate::codec::{PackedLayout, decode, decode_v2, encode, encode_v2};
use crate::errors::{SolisError, SolisResult};
use crate::registers::{
    BATTERY_CAPACITY, BATTERY_FORCE_CHARGE_SOC, BATTERY_RESERVE_SOC, CHARGE_DISCHARGE_SETTINGS,
    MAX_CHARGE_CURRENT, MAX_DISCHARGE_CURRENT, STORAGE_MODE, TOU_MODE_INDICATOR, TOU_V2_ENABLED,
    v2_slot_cids,
};
use crate::storage::{BitOp, StorageFlag, StorageMode, apply_bit};
use crate::types::{InverterSummary, InverterTelemetry};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDateTime, NaiveTime};
use fluxion_control::{CloudSchedule, CloudScheduleControl};
use fluxion_types::{RateLimits, ScheduleVariant, SlotSetting};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

const LIST_PAGE_SIZE: usize = 100;

fn default_variant() -> ScheduleVariant {
    ScheduleVariant::PackedA
}

fn default_true() -> bool {
    true
}

fn default_battery_voltage() -> f64 {
    52.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Used when the firmware reports neither the V2 indicator nor a known packed length
    #[serde(default = "default_variant")]
    pub default_variant: ScheduleVariant,

    /// Zero slots 2-6 on every schedule write
    #[serde(default = "default_true")]
    pub force_disable_other_slots: bool,

    /// Converts between watts and the amps the current registers hold
    #[serde(default = "default_battery_voltage")]
    pub battery_voltage: f64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            default_variant: default_variant(),
            force_disable_other_slots: true,
            battery_voltage: default_battery_voltage(),
        }
    }
}

/// Authenticated register access for one inverter
#[derive(Debug)]
pub struct CloudRegisterBackend {
    device_id: String,
    serial: String,
    client: SolisClient,
    settings: BackendSettings,
    cache: Mutex<RegisterCache>,
    variant: Mutex<Option<ScheduleVariant>>,
    telemetry: Mutex<Option<InverterTelemetry>>,
    write_count: AtomicU64,
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Collect every `{cid, msg}` object, however deeply the response nests them
fn collect_batch(data: &Value, out: &mut HashMap<u32, String>) {
    match data {
        Value::Array(items) => {
            for item in items {
                collect_batch(item, out);
            }
        }
        Value::Object(map) => {
            let cid = map
                .get("cid")
                .and_then(value_as_string)
                .and_then(|c| c.trim().parse::<u32>().ok());
            let msg = map.get("msg").and_then(value_as_string);
            if let (Some(cid), Some(msg)) = (cid, msg) {
                out.insert(cid, msg);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
    }
}

/// Percent rounded into the register's 0..=100 range
#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn soc_register(soc: f64) -> u32 {
    soc.round().clamp(0.0, 100.0) as u32
}

/// Result code of a control response (`[{code, msg}]` or `{code, msg}`)
fn control_result(data: &Value) -> (String, String) {
    let entry = match data {
        Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
        other => other.clone(),
    };
    let code = entry
        .get("code")
        .and_then(value_as_string)
        .unwrap_or_else(|| "0".to_owned());
    let msg = entry
        .get("msg")
        .and_then(value_as_string)
        .unwrap_or_default();
    (code, msg)
}

fn window(enabled: bool, start: NaiveTime, end: NaiveTime) -> Option<(NaiveTime, NaiveTime)> {
    (enabled && start != end).then_some((start, end))
}

/// Storage mode implied by slot one of a schedule
pub fn storage_mode_for(slot: &SlotSetting) -> StorageMode {
    if slot.charge_current == 0 {
        StorageMode::FeedIn
    } else if !slot.charge_enable && !slot.discharge_enable {
        StorageMode::SelfUseNoTimed
    } else {
        StorageMode::SelfUse
    }
}

impl CloudRegisterBackend {
    pub fn new(
        device_id: impl Into<String>,
        serial: impl Into<String>,
        client: SolisClient,
        settings: BackendSettings,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            serial: serial.into(),
            client,
            settings,
            cache: Mutex::new(RegisterCache::new()),
            variant: Mutex::new(None),
            telemetry: Mutex::new(None),
            write_count: AtomicU64::new(0),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Last known value of a register without touching the network
    pub fn cached(&self, cid: u32) -> Option<String> {
        self.cache.lock().get(cid).map(str::to_owned)
    }

    pub fn telemetry(&self) -> Option<InverterTelemetry> {
        self.telemetry.lock().clone()
    }

    /// Number of register writes actually sent
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn amps_for(&self, rate_w: f64) -> u32 {
        if rate_w <= 0.0 || self.settings.battery_voltage <= 0.0 {
            return 0;
        }
        (rate_w / self.settings.battery_voltage).round() as u32
    }

    pub fn watts_for(&self, amps: u32) -> f64 {
        f64::from(amps) * self.settings.battery_voltage
    }

    pub async fn read_register(&self, cid: u32) -> SolisResult<String> {
        let body = json!({ "inverterSn": self.serial, "cid": cid.to_string() });
        let data = self.client.call(PATH_READ, &body).await?;
        let value = data
            .get("msg")
            .and_then(value_as_string)
            .ok_or_else(|| SolisError::InvalidResponse(format!("no value for register {}", cid)))?;

        debug!("🔍 [SOLIS] {} register {} = '{}'", self.device_id, cid, value);
        self.cache.lock().insert(cid, value.clone());
        Ok(value)
    }

    /// Read several registers in one request; registers the device omits are absent
    pub async fn read_batch(&self, cids: &[u32]) -> SolisResult<HashMap<u32, String>> {
        let ids: Vec<String> = cids.iter().map(u32::to_string).collect();
        let body = json!({ "inverterSn": self.serial, "cids": ids.join(",") });
        let data = self.client.call(PATH_READ_BATCH, &body).await?;

        let mut values = HashMap::new();
        collect_batch(&data, &mut values);
        if values.len() < cids.len() {
            debug!(
                "🔍 [SOLIS] {} batch returned {}/{} registers",
                self.device_id,
                values.len(),
                cids.len()
            );
        }
        self.cache.lock().extend(&values);
        Ok(values)
    }

    /// Send a control write unless `current` already equals `value`
    async fn control(&self, cid: u32, value: &str, current: &str) -> SolisResult<bool> {
        if values_equal(current, value) {
            debug!(
                "✓ [SOLIS] {} register {} already '{}'",
                self.device_id, cid, value
            );
            return Ok(false);
        }

        info!(
            "📝 [SOLIS] {} register {}: '{}' -> '{}'",
            self.device_id, cid, current, value
        );
        let body = json!({
            "inverterSn": self.serial,
            "cid": cid.to_string(),
            "value": value,
            "yuanzhi": current,
        });
        let data = self.client.call(PATH_CONTROL, &body).await?;
        let (code, message) = control_result(&data);
        if code != "0" {
            error!(
                "❌ [SOLIS] {} write to {} rejected (code {}): {}",
                self.device_id, cid, code, message
            );
            return Err(SolisError::WriteRejected { cid, message });
        }

        self.cache.lock().insert(cid, value);
        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Read the register, then write `value` if it differs; returns whether a write was sent
    pub async fn write_register(&self, cid: u32, value: &str) -> SolisResult<bool> {
        let current = self.read_register(cid).await?;
        self.control(cid, value, &current).await
    }

    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    async fn read_storage_mode(&self) -> SolisResult<u32> {
        let raw = self.read_register(STORAGE_MODE).await?;
        raw.trim()
            .parse::<f64>()
            .map(|v| v as u32)
            .map_err(|_| SolisError::InvalidResponse(format!("storage mode '{}'", raw)))
    }

    /// Set, clear or toggle one flag of the storage-mode register
    pub async fn write_storage_bit(&self, flag: StorageFlag, op: BitOp) -> SolisResult<bool> {
        let current = self.read_storage_mode().await?;
        let updated = apply_bit(current, flag, op);
        self.control(STORAGE_MODE, &updated.to_string(), &current.to_string())
            .await
    }

    pub async fn set_storage_mode(&self, mode: StorageMode) -> SolisResult<bool> {
        let changed = self
            .write_register(STORAGE_MODE, &mode.value().to_string())
            .await?;
        if changed {
            info!("🔧 [SOLIS] {} storage mode -> {}", self.device_id, mode);
        }
        Ok(changed)
    }

    /// Unknown names are logged and skipped
    pub async fn set_storage_mode_by_name(&self, name: &str) -> SolisResult<bool> {
        match name.parse::<StorageMode>() {
            Ok(mode) => self.set_storage_mode(mode).await,
            Err(e) => {
                error!("❌ [SOLIS] {}: {}", self.device_id, e);
                Ok(false)
            }
        }
    }

    /// Work out which schedule layout the firmware uses and remember it
    pub async fn detect_variant(&self) -> SolisResult<ScheduleVariant> {
        let indicator = match self.read_register(TOU_MODE_INDICATOR).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    "⚠️ [SOLIS] {} could not read layout indicator: {}",
                    self.device_id, e
                );
                None
            }
        };

        let variant = if indicator.is_some_and(|v| values_equal(&v, TOU_V2_ENABLED)) {
            ScheduleVariant::V2
        } else {
            let packed = self.read_register(CHARGE_DISCHARGE_SETTINGS).await?;
            let fields = packed.split(',').count();
            PackedLayout::from_field_count(fields)
                .map(ScheduleVariant::from)
                .unwrap_or(self.settings.default_variant)
        };

        let previous = self.variant.lock().replace(variant);
        if previous != Some(variant) {
            info!("🔧 [SOLIS] {} schedule layout: {:?}", self.device_id, variant);
        }
        Ok(variant)
    }

    pub async fn variant(&self) -> SolisResult<ScheduleVariant> {
        let known = *self.variant.lock();
        match known {
            Some(variant) => Ok(variant),
            None => self.detect_variant().await,
        }
    }

    /// All six slots as the device currently holds them
    pub async fn read_slots(&self) -> SolisResult<Vec<SlotSetting>> {
        match self.variant().await? {
            ScheduleVariant::V2 => Ok(decode_v2(&self.read_batch(&v2_slot_cids()).await?)),
            packed => {
                let layout = PackedLayout::try_from(packed)
                    .map_err(|e| SolisError::ConfigError(e.to_string()))?;
                let wire = self.read_register(CHARGE_DISCHARGE_SETTINGS).await?;
                Ok(decode(&wire, layout))
            }
        }
    }

    /// Write slots in the active layout, touching only registers that differ
    pub async fn write_slots(&self, slots: &[SlotSetting]) -> SolisResult<bool> {
        match self.variant().await? {
            ScheduleVariant::V2 => {
                let current = self.read_batch(&v2_slot_cids()).await?;
                let mut changed = false;
                for (cid, value) in encode_v2(slots) {
                    let existing = current.get(&cid).map_or("", String::as_str);
                    changed |= self.control(cid, &value, existing).await?;
                }
                Ok(changed)
            }
            packed => {
                let layout = PackedLayout::try_from(packed)
                    .map_err(|e| SolisError::ConfigError(e.to_string()))?;
                self.write_register(CHARGE_DISCHARGE_SETTINGS, &encode(slots, layout))
                    .await
            }
        }
    }

    /// Serials of every inverter on the account
    pub async fn discover_serials(&self) -> SolisResult<Vec<InverterSummary>> {
        let mut found = Vec::new();
        let mut page = 1;
        loop {
            let body = json!({ "pageNo": page, "pageSize": LIST_PAGE_SIZE });
            let data = self.client.call(PATH_INVERTER_LIST, &body).await?;
            let records: Vec<InverterSummary> = data
                .pointer("/page/records")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            let total = data
                .pointer("/page/total")
                .and_then(Value::as_u64)
                .and_then(|t| usize::try_from(t).ok())
                .unwrap_or(0);

            let page_len = records.len();
            found.extend(records);
            if page_len < LIST_PAGE_SIZE || found.len() >= total {
                break;
            }
            page += 1;
        }
        info!("🔍 [SOLIS] Discovered {} inverters", found.len());
        Ok(found)
    }

    pub async fn poll_telemetry(&self) -> SolisResult<InverterTelemetry> {
        let body = json!({ "sn": self.serial });
        let detail = self.client.call(PATH_INVERTER_DETAIL, &body).await?;
        let raw_capacity = self.cache.lock().get_f64(BATTERY_CAPACITY);
        let telemetry = InverterTelemetry::from_detail(&detail).with_raw_capacity(raw_capacity);

        debug!(
            "📊 [SOLIS] {} SOC {:?}%, battery {:?} W, PV {:?} W, grid {:?} W",
            self.device_id,
            telemetry.soc,
            telemetry.battery_power_w,
            telemetry.pv_power_w,
            telemetry.grid_power_w
        );
        *self.telemetry.lock() = Some(telemetry.clone());
        Ok(telemetry)
    }

    /// Re-detect the layout and read the slow settings registers
    pub async fn poll_settings(&self) -> SolisResult<Option<RateLimits>> {
        self.detect_variant().await?;
        let values = self
            .read_batch(&[MAX_CHARGE_CURRENT, MAX_DISCHARGE_CURRENT, BATTERY_CAPACITY])
            .await?;
        let amps = |cid: u32| values.get(&cid).and_then(|v| v.trim().parse::<f64>().ok());

        if let Some(raw) = amps(BATTERY_CAPACITY) {
            let mut telemetry = self.telemetry.lock();
            let updated = telemetry
                .take()
                .unwrap_or_default()
                .with_raw_capacity(Some(raw));
            *telemetry = Some(updated);
        }

        match (amps(MAX_CHARGE_CURRENT), amps(MAX_DISCHARGE_CURRENT)) {
            (Some(charge), Some(discharge)) => Ok(Some(RateLimits {
                max_charge_w: charge * self.settings.battery_voltage,
                max_discharge_w: discharge * self.settings.battery_voltage,
                min_rate_w: 0.0,
            })),
            _ => Ok(None),
        }
    }

    async fn target_soc(&self, variant: ScheduleVariant, slot: &SlotSetting) -> SolisResult<Option<f64>> {
        if variant == ScheduleVariant::V2 {
            return Ok((slot.charge_soc > 0).then_some(f64::from(slot.charge_soc)));
        }
        let raw = self.read_register(BATTERY_FORCE_CHARGE_SOC).await?;
        Ok(raw.trim().parse::<f64>().ok())
    }

    /// Slot one built from the schedule, other fields kept from `existing`
    fn slot_from_schedule(&self, schedule: &CloudSchedule, existing: &SlotSetting) -> SlotSetting {
        let (charge_start, charge_end) = schedule.charge.unwrap_or((NaiveTime::MIN, NaiveTime::MIN));
        let (discharge_start, discharge_end) =
            schedule.discharge.unwrap_or((NaiveTime::MIN, NaiveTime::MIN));

        SlotSetting {
            charge_enable: schedule.charge.is_some(),
            charge_start,
            charge_end,
            charge_soc: schedule
                .target_soc
                .map_or(existing.charge_soc, soc_register),
            charge_current: self.amps_for(schedule.charge_rate_w),
            discharge_enable: schedule.discharge.is_some(),
            discharge_start,
            discharge_end,
            discharge_soc: existing.discharge_soc,
            discharge_current: self.amps_for(schedule.discharge_rate_w),
        }
    }
}

#[async_trait]
impl CloudScheduleControl for CloudRegisterBackend {
    async fn read_schedule(&self) -> Result<CloudSchedule> {
        let variant = self.variant().await?;
        let slots = self.read_slots().await?;
        let slot = slots.first().copied().unwrap_or_default();

        Ok(CloudSchedule {
            charge: window(slot.charge_enable, slot.charge_start, slot.charge_end),
            discharge: window(slot.discharge_enable, slot.discharge_start, slot.discharge_end),
            charge_rate_w: self.watts_for(slot.charge_current),
            discharge_rate_w: self.watts_for(slot.discharge_current),
            target_soc: self.target_soc(variant, &slot).await?,
        })
    }

    async fn write_schedule(&self, schedule: &CloudSchedule) -> Result<bool> {
        let variant = self.variant().await?;
        let mut slots = self.read_slots().await?;
        if slots.is_empty() {
            slots.push(SlotSetting::disabled());
        }

        let slot = self.slot_from_schedule(schedule, &slots[0]);
        slots[0] = slot;
        if self.settings.force_disable_other_slots {
            for other in slots.iter_mut().skip(1) {
                *other = SlotSetting::disabled();
            }
        }

        let mut changed = self.write_slots(&slots).await?;
        if variant.is_packed() {
            if let Some(soc) = schedule.target_soc {
                let soc = soc_register(soc);
                changed |= self
                    .write_register(BATTERY_FORCE_CHARGE_SOC, &soc.to_string())
                    .await?;
            }
        }
        changed |= self.set_storage_mode(storage_mode_for(&slot)).await?;

        if changed {
            info!(
                "✅ [SOLIS] {} schedule written: charge {:?}, discharge {:?}",
                self.device_id, schedule.charge, schedule.discharge
            );
        }
        Ok(changed)
    }

    async fn read_reserve(&self) -> Result<Option<f64>> {
        let raw = self.read_register(BATTERY_RESERVE_SOC).await?;
        Ok(raw.trim().parse::<f64>().ok())
    }

    async fn write_reserve(&self, soc: f64) -> Result<bool> {
        let soc = soc_register(soc);
        Ok(self
            .write_register(BATTERY_RESERVE_SOC, &soc.to_string())
            .await?)
    }

    async fn device_time(&self) -> Result<Option<NaiveDateTime>> {
        Ok(None)
    }

    async fn refresh_telemetry(&self) -> Result<()> {
        self.poll_telemetry().await?;
        Ok(())
    }

    async fn refresh_settings(&self) -> Result<Option<RateLimits>> {
        Ok(self.poll_settings().await?)
    }

    fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    fn name(&self) -> &str {
        &self.device_id
    }
}
