//! Alert types and the deduplicating alert engine.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use botica_core::{AlertId, Lot, ProductId, ProductPolicy, StockError, StockKey, StockResult, WarehouseId};
use botica_ledger::StockBalance;

/// Alert type. Serialized values are the exact strings external reports
/// depend on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    StockBajo,
    StockCritico,
    StockCero,
    StockExcesivo,
    VencimientoProximo,
    VencimientoCritico,
}

impl AlertType {
    const ALL: [AlertType; 6] = [
        AlertType::StockBajo,
        AlertType::StockCritico,
        AlertType::StockCero,
        AlertType::StockExcesivo,
        AlertType::VencimientoProximo,
        AlertType::VencimientoCritico,
    ];
}

/// Alert lifecycle. Serialized values are the exact strings external
/// reports depend on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Activa,
    Procesada,
    Resuelta,
    Descartada,
}

impl core::fmt::Display for AlertState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            AlertState::Activa => "activa",
            AlertState::Procesada => "procesada",
            AlertState::Resuelta => "resuelta",
            AlertState::Descartada => "descartada",
        };
        f.write_str(s)
    }
}

/// One alert occurrence. At most one non-resolved alert exists per
/// (key, type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub key: StockKey,
    pub alert_type: AlertType,
    pub estado: AlertState,
    pub mensaje: String,
    pub raised_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Expiration alerting windows, in days before the lot's expiration date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertConfig {
    pub dias_aviso_vencimiento: i64,
    pub dias_critico_vencimiento: i64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            dias_aviso_vencimiento: 90,
            dias_critico_vencimiento: 30,
        }
    }
}

/// Filter for listing active alerts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
    pub alert_type: Option<AlertType>,
}

impl AlertFilter {
    fn matches(&self, alert: &Alert) -> bool {
        self.product_id.is_none_or(|p| alert.key.product_id == p)
            && self.warehouse_id.is_none_or(|w| alert.key.warehouse_id == w)
            && self.alert_type.is_none_or(|t| alert.alert_type == t)
    }
}

/// Derives and deduplicates alerts from aggregate state.
///
/// Evaluation is a pure function of the balance, the product thresholds
/// and the lot expiration; running it twice on unchanged state never
/// raises a duplicate. Dismissed alerts stay suppressed while their
/// condition persists and are retired once it clears, so a later
/// recurrence raises a fresh alert.
#[derive(Default)]
pub struct AlertEngine {
    config: AlertConfig,
    entries: RwLock<HashMap<(StockKey, AlertType), Alert>>,
}

impl AlertEngine {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Re-derive the alert set for one key from its current state.
    pub fn evaluate(
        &self,
        key: &StockKey,
        balance: StockBalance,
        policy: &ProductPolicy,
        lot: Option<&Lot>,
        now: DateTime<Utc>,
    ) {
        let conditions = self.conditions(balance, policy, lot, now);
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for alert_type in AlertType::ALL {
            let triggered = conditions.iter().find(|(t, _)| *t == alert_type);
            let map_key = (key.clone(), alert_type);
            match (triggered, entries.get_mut(&map_key)) {
                (Some((_, mensaje)), None) => {
                    tracing::info!(key = %key, tipo = ?alert_type, "alerta activada");
                    entries.insert(
                        map_key,
                        Alert {
                            id: AlertId::new(),
                            key: key.clone(),
                            alert_type,
                            estado: AlertState::Activa,
                            mensaje: mensaje.clone(),
                            raised_at: now,
                            updated_at: now,
                        },
                    );
                }
                (Some((_, mensaje)), Some(alert)) => match alert.estado {
                    // Still firing: active/acknowledged/dismissed entries
                    // stay as they are (dedup + suppression).
                    AlertState::Activa | AlertState::Procesada | AlertState::Descartada => {}
                    AlertState::Resuelta => {
                        *alert = Alert {
                            id: AlertId::new(),
                            key: key.clone(),
                            alert_type,
                            estado: AlertState::Activa,
                            mensaje: mensaje.clone(),
                            raised_at: now,
                            updated_at: now,
                        };
                    }
                },
                (None, Some(alert)) => match alert.estado {
                    AlertState::Activa | AlertState::Procesada => {
                        alert.estado = AlertState::Resuelta;
                        alert.updated_at = now;
                    }
                    // Retire the dismissed entry so a recurrence raises anew.
                    AlertState::Descartada => {
                        entries.remove(&map_key);
                    }
                    AlertState::Resuelta => {}
                },
                (None, None) => {}
            }
        }
    }

    pub fn list_active(&self, filter: &AlertFilter) -> Vec<Alert> {
        match self.entries.read() {
            Ok(entries) => {
                let mut alerts: Vec<Alert> = entries
                    .values()
                    .filter(|a| a.estado == AlertState::Activa && filter.matches(a))
                    .cloned()
                    .collect();
                alerts.sort_by_key(|a| a.raised_at);
                alerts
            }
            Err(_) => Vec::new(),
        }
    }

    /// Mark an active alert as seen by an operator.
    pub fn acknowledge(&self, id: AlertId, now: DateTime<Utc>) -> StockResult<Alert> {
        self.transition(id, AlertState::Procesada, "procesar", now)
    }

    /// Dismiss an alert: suppressed while its condition persists.
    pub fn dismiss(&self, id: AlertId, now: DateTime<Utc>) -> StockResult<Alert> {
        self.transition(id, AlertState::Descartada, "descartar", now)
    }

    pub fn get(&self, id: AlertId) -> Option<Alert> {
        match self.entries.read() {
            Ok(entries) => entries.values().find(|a| a.id == id).cloned(),
            Err(_) => None,
        }
    }

    fn transition(
        &self,
        id: AlertId,
        target: AlertState,
        attempted: &'static str,
        now: DateTime<Utc>,
    ) -> StockResult<Alert> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StockError::concurrent("alert store poisoned"))?;
        let alert = entries
            .values_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StockError::not_found(format!("alert {id}")))?;

        let legal = matches!(
            (alert.estado, target),
            (AlertState::Activa, AlertState::Procesada)
                | (AlertState::Activa, AlertState::Descartada)
                | (AlertState::Procesada, AlertState::Descartada)
        );
        if alert.estado == target {
            return Ok(alert.clone());
        }
        if !legal {
            return Err(StockError::invalid_transition(
                "alert",
                alert.estado.to_string(),
                attempted,
            ));
        }
        alert.estado = target;
        alert.updated_at = now;
        Ok(alert.clone())
    }

    fn conditions(
        &self,
        balance: StockBalance,
        policy: &ProductPolicy,
        lot: Option<&Lot>,
        now: DateTime<Utc>,
    ) -> Vec<(AlertType, String)> {
        let mut conditions = Vec::new();
        let disponible = balance.disponible();

        if policy.stock_critico > 0 && disponible <= policy.stock_critico {
            conditions.push((
                AlertType::StockCritico,
                format!(
                    "'{}' en nivel critico: disponible {disponible} <= {}",
                    policy.nombre, policy.stock_critico
                ),
            ));
        }
        if policy.stock_minimo > 0 && disponible <= policy.stock_minimo {
            conditions.push((
                AlertType::StockBajo,
                format!(
                    "'{}' bajo minimo: disponible {disponible} <= {}",
                    policy.nombre, policy.stock_minimo
                ),
            ));
        }
        if balance.actual == 0 {
            conditions.push((
                AlertType::StockCero,
                format!("'{}' sin existencias", policy.nombre),
            ));
        }
        if let Some(maximo) = policy.stock_maximo {
            if balance.actual > maximo {
                conditions.push((
                    AlertType::StockExcesivo,
                    format!(
                        "'{}' sobre maximo: actual {} > {maximo}",
                        policy.nombre, balance.actual
                    ),
                ));
            }
        }
        if let Some(fecha) = lot.and_then(|l| l.fecha_vencimiento) {
            let days = (fecha - now.date_naive()).num_days();
            if days <= self.config.dias_critico_vencimiento {
                conditions.push((
                    AlertType::VencimientoCritico,
                    format!("'{}' vence en {days} dias", policy.nombre),
                ));
            } else if days <= self.config.dias_aviso_vencimiento {
                conditions.push((
                    AlertType::VencimientoProximo,
                    format!("'{}' vence en {days} dias", policy.nombre),
                ));
            }
        }
        conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botica_core::LotNumber;
    use chrono::Duration;

    fn policy(minimo: i64, critico: i64, maximo: Option<i64>) -> ProductPolicy {
        ProductPolicy::basic(ProductId::new(), "Omeprazol 20mg")
            .with_thresholds(minimo, critico, maximo)
    }

    fn key_for(policy: &ProductPolicy) -> StockKey {
        StockKey::new(policy.product_id, WarehouseId::new())
    }

    #[test]
    fn low_available_stock_raises_stock_bajo() {
        let engine = AlertEngine::default();
        let policy = policy(10, 0, None);
        let key = key_for(&policy);

        engine.evaluate(&key, StockBalance::new(50, 45), &policy, None, Utc::now());

        let active = engine.list_active(&AlertFilter::default());
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alert_type, AlertType::StockBajo);
    }

    #[test]
    fn re_evaluation_on_unchanged_state_is_idempotent() {
        let engine = AlertEngine::default();
        let policy = policy(10, 0, None);
        let key = key_for(&policy);
        let balance = StockBalance::new(5, 0);

        engine.evaluate(&key, balance, &policy, None, Utc::now());
        let first = engine.list_active(&AlertFilter::default());
        engine.evaluate(&key, balance, &policy, None, Utc::now());
        let second = engine.list_active(&AlertFilter::default());

        assert_eq!(first, second);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn cleared_condition_resolves_the_alert_and_recurrence_raises_anew() {
        let engine = AlertEngine::default();
        let policy = policy(10, 0, None);
        let key = key_for(&policy);

        engine.evaluate(&key, StockBalance::new(5, 0), &policy, None, Utc::now());
        let raised = engine.list_active(&AlertFilter::default());
        assert_eq!(raised.len(), 1);

        engine.evaluate(&key, StockBalance::new(40, 0), &policy, None, Utc::now());
        assert!(engine.list_active(&AlertFilter::default()).is_empty());
        assert_eq!(
            engine.get(raised[0].id).unwrap().estado,
            AlertState::Resuelta
        );

        engine.evaluate(&key, StockBalance::new(4, 0), &policy, None, Utc::now());
        let again = engine.list_active(&AlertFilter::default());
        assert_eq!(again.len(), 1);
        assert_ne!(again[0].id, raised[0].id);
    }

    #[test]
    fn critical_threshold_raises_both_critico_and_bajo() {
        let engine = AlertEngine::default();
        let policy = policy(10, 3, None);
        let key = key_for(&policy);

        engine.evaluate(&key, StockBalance::new(2, 0), &policy, None, Utc::now());

        let types: Vec<AlertType> = engine
            .list_active(&AlertFilter::default())
            .iter()
            .map(|a| a.alert_type)
            .collect();
        assert!(types.contains(&AlertType::StockCritico));
        assert!(types.contains(&AlertType::StockBajo));
    }

    #[test]
    fn zero_and_excess_conditions() {
        let engine = AlertEngine::default();
        let policy = policy(0, 0, Some(100));
        let key = key_for(&policy);

        engine.evaluate(&key, StockBalance::new(0, 0), &policy, None, Utc::now());
        let filter = AlertFilter {
            alert_type: Some(AlertType::StockCero),
            ..AlertFilter::default()
        };
        assert_eq!(engine.list_active(&filter).len(), 1);

        engine.evaluate(&key, StockBalance::new(120, 0), &policy, None, Utc::now());
        let filter = AlertFilter {
            alert_type: Some(AlertType::StockExcesivo),
            ..AlertFilter::default()
        };
        assert_eq!(engine.list_active(&filter).len(), 1);
        // StockCero resolved when stock came back.
        let filter = AlertFilter {
            alert_type: Some(AlertType::StockCero),
            ..AlertFilter::default()
        };
        assert!(engine.list_active(&filter).is_empty());
    }

    #[test]
    fn expiration_windows_pick_the_matching_alert() {
        let engine = AlertEngine::new(AlertConfig::default());
        let policy = policy(0, 0, None);
        let key = StockKey::with_lot(policy.product_id, WarehouseId::new(), "L-1");
        let now = Utc::now();

        let far = Lot::new(policy.product_id, LotNumber::new("L-1"))
            .expiring(now.date_naive() + Duration::days(60));
        engine.evaluate(&key, StockBalance::new(10, 0), &policy, Some(&far), now);
        let types: Vec<AlertType> = engine
            .list_active(&AlertFilter::default())
            .iter()
            .map(|a| a.alert_type)
            .collect();
        assert_eq!(types, vec![AlertType::VencimientoProximo]);

        let near = Lot::new(policy.product_id, LotNumber::new("L-1"))
            .expiring(now.date_naive() + Duration::days(10));
        engine.evaluate(&key, StockBalance::new(10, 0), &policy, Some(&near), now);
        let types: Vec<AlertType> = engine
            .list_active(&AlertFilter::default())
            .iter()
            .map(|a| a.alert_type)
            .collect();
        // The proximity alert resolves once the critical window applies.
        assert_eq!(types, vec![AlertType::VencimientoCritico]);
    }

    #[test]
    fn dismissed_alert_stays_suppressed_until_the_condition_clears() {
        let engine = AlertEngine::default();
        let policy = policy(10, 0, None);
        let key = key_for(&policy);
        let now = Utc::now();

        engine.evaluate(&key, StockBalance::new(5, 0), &policy, None, now);
        let alert = engine.list_active(&AlertFilter::default()).remove(0);
        engine.dismiss(alert.id, now).unwrap();

        // Condition persists: nothing active, nothing re-raised.
        engine.evaluate(&key, StockBalance::new(4, 0), &policy, None, now);
        assert!(engine.list_active(&AlertFilter::default()).is_empty());

        // Condition clears, then recurs: a fresh alert fires.
        engine.evaluate(&key, StockBalance::new(50, 0), &policy, None, now);
        engine.evaluate(&key, StockBalance::new(3, 0), &policy, None, now);
        let active = engine.list_active(&AlertFilter::default());
        assert_eq!(active.len(), 1);
        assert_ne!(active[0].id, alert.id);
    }

    #[test]
    fn acknowledge_keeps_dedup_but_hides_from_active_list() {
        let engine = AlertEngine::default();
        let policy = policy(10, 0, None);
        let key = key_for(&policy);
        let now = Utc::now();

        engine.evaluate(&key, StockBalance::new(5, 0), &policy, None, now);
        let alert = engine.list_active(&AlertFilter::default()).remove(0);
        let processed = engine.acknowledge(alert.id, now).unwrap();
        assert_eq!(processed.estado, AlertState::Procesada);

        engine.evaluate(&key, StockBalance::new(5, 0), &policy, None, now);
        assert!(engine.list_active(&AlertFilter::default()).is_empty());

        // Clearing the condition resolves the acknowledged alert.
        engine.evaluate(&key, StockBalance::new(50, 0), &policy, None, now);
        assert_eq!(engine.get(alert.id).unwrap().estado, AlertState::Resuelta);
    }

    #[test]
    fn filters_narrow_by_product_warehouse_and_type() {
        let engine = AlertEngine::default();
        let policy_a = policy(10, 0, None);
        let policy_b = policy(10, 0, None);
        let key_a = key_for(&policy_a);
        let key_b = key_for(&policy_b);

        engine.evaluate(&key_a, StockBalance::new(5, 0), &policy_a, None, Utc::now());
        engine.evaluate(&key_b, StockBalance::new(5, 0), &policy_b, None, Utc::now());

        assert_eq!(engine.list_active(&AlertFilter::default()).len(), 2);
        let filter = AlertFilter {
            product_id: Some(policy_a.product_id),
            ..AlertFilter::default()
        };
        let narrowed = engine.list_active(&filter);
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].key, key_a);
    }

    #[test]
    fn alert_enums_serialize_to_exact_strings() {
        assert_eq!(
            serde_json::to_value(AlertType::VencimientoProximo).unwrap(),
            serde_json::Value::String("vencimiento_proximo".to_string())
        );
        assert_eq!(
            serde_json::to_value(AlertState::Descartada).unwrap(),
            serde_json::Value::String("descartada".to_string())
        );
    }
}
