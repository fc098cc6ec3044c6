//! Human-readable rendering of the administrative audit log.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fields compared when summarising an edit, with their labels.
const TRACKED_FIELDS: [(&str, &str); 8] = [
    ("name", "Nome"),
    ("description", "Descrição"),
    ("min_time", "Tempo Mínimo"),
    ("max_time", "Tempo Máximo"),
    ("active", "Ativo"),
    ("role", "Cargo"),
    ("unit", "Unidade"),
    ("available_days", "Dias Disponíveis"),
];

/// A row of the administrative audit log.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AdminLogEntry {
    pub action_type: String,
    pub table_name: String,
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub old_data: Option<Value>,
    #[serde(default)]
    pub new_data: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditIcon {
    Create,
    Update,
    Delete,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditSummary {
    pub action: String,
    pub target: String,
    pub details: String,
    pub icon: AuditIcon,
}

pub fn action_label(action: &str) -> Cow<'_, str> {
    let label = match action {
        "CREATE_ROOM" => "Criou Sala",
        "UPDATE_ROOM" => "Editou Sala",
        "DELETE_ROOM" => "Excluiu Sala",
        "TOGGLE_ROOM_AVAILABILITY" => "Alterou Disponibilidade de Sala",
        "DELETE_ROOM_BOOKING" => "Excluiu Reserva de Sala",
        "CREATE_LOAN" => "Novo Empréstimo",
        "RETURN_LOAN" => "Devolução de Equipamento",
        "DELETE_LOAN" => "Excluiu Empréstimo",
        "UPDATE_USER" => "Gerenciou Professor",
        "DELETE_BOOKINGS" => "Cancelou Agendamento(s)",
        "UPDATE_ADMIN" => "Editou Administrador",
        "RESET_ADMIN_PASSWORD" => "Resetou Senha de Admin",
        "DELETE_ADMIN_BOOKINGS" => "Removeu Agendamentos",
        other => return Cow::Owned(other.replace('_', " ")),
    };
    Cow::Borrowed(label)
}

pub fn target_label(table: &str) -> &str {
    match table {
        "rooms" => "Sala",
        "equipment_loans" => "Empréstimo",
        "users" => "Professor",
        "bookings" => "Agendamento",
        "admins" => "Administrador",
        other => other,
    }
}

pub fn icon(action: &str) -> AuditIcon {
    let upper = action.to_uppercase();
    if upper.contains("CREATE") {
        AuditIcon::Create
    } else if upper.contains("DELETE") {
        AuditIcon::Delete
    } else if upper.contains("UPDATE") || upper.contains("TOGGLE") {
        AuditIcon::Update
    } else {
        AuditIcon::Info
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Bool(true) => "Sim".to_string(),
        Value::Bool(false) => "Não".to_string(),
        Value::Null => "Vazio".to_string(),
        Value::String(s) if s.is_empty() => "Vazio".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) if n.as_f64() == Some(0.0) => "Vazio".to_string(),
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

/// One-line description of what an edit changed, e.g. `Nome: Lab 1 ➝ Lab 2`.
/// `None` when either side is missing or no tracked field changed.
pub fn change_tip(old: Option<&Value>, new: Option<&Value>) -> Option<String> {
    let (old, new) = (old?, new?);
    let changes: Vec<String> = TRACKED_FIELDS
        .iter()
        .filter_map(|(key, label)| {
            let before = old.get(key)?;
            let after = new.get(key)?;
            (before != after).then(|| {
                format!(
                    "{label}: {} ➝ {}",
                    display_value(before),
                    display_value(after)
                )
            })
        })
        .collect();
    (!changes.is_empty()).then(|| changes.join(" | "))
}

fn text<'a>(data: Option<&'a Value>, key: &str) -> Option<&'a str> {
    data?.get(key)?.as_str().filter(|s| !s.is_empty())
}

fn local_timestamp(value: Option<&str>, offset: FixedOffset, pattern: &str) -> Option<String> {
    let ts: DateTime<Utc> = value?.parse().ok()?;
    Some(ts.with_timezone(&offset).format(pattern).to_string())
}

/// Summarise a log row for the admin log screen.
pub fn summarize(entry: &AdminLogEntry, offset: FixedOffset) -> AuditSummary {
    let old = entry.old_data.as_ref();
    let new = entry.new_data.as_ref();
    let record = entry.record_id.as_deref().unwrap_or("?");

    let details = match (entry.table_name.as_str(), entry.action_type.as_str()) {
        ("rooms", action) => {
            let room = text(new, "name")
                .or_else(|| text(old, "name"))
                .unwrap_or("Desconhecida");
            match action {
                "CREATE_ROOM" => Some(format!(
                    "Criou a sala \"{room}\" na unidade {}.",
                    text(new, "unit").unwrap_or("?")
                )),
                "UPDATE_ROOM" => Some(format!("Atualizou dados da sala \"{room}\".")),
                "DELETE_ROOM" => Some(format!("Removeu a sala \"{room}\" permanentemente.")),
                "TOGGLE_ROOM_AVAILABILITY" => Some(format!(
                    "Alterou a disponibilidade da sala (ID: {record})."
                )),
                _ => None,
            }
        }
        ("equipment_loans", "RETURN_LOAN") => Some(format!(
            "Confirmou devolução de empréstimo (ID: {record})."
        )),
        ("equipment_loans", "CREATE_LOAN") => Some(format!(
            "Novo empréstimo de \"{}\"{}.",
            text(new, "equipment_name").unwrap_or("Equipamento"),
            text(new, "unit").map(|u| format!(" ({u})")).unwrap_or_default()
        )),
        ("users", "UPDATE_USER") => {
            let user = text(new, "full_name")
                .or_else(|| text(old, "full_name"))
                .unwrap_or("Usuário");
            let mut changes = Vec::new();
            let active = |d: Option<&Value>| d.and_then(|d| d.get("active")).cloned();
            if active(old) != active(new) {
                let reactivated = active(new).and_then(|v| v.as_bool()).unwrap_or(false);
                changes.push(if reactivated {
                    "Reativou acesso"
                } else {
                    "Desativou acesso"
                });
            }
            let units = |d: Option<&Value>| d.and_then(|d| d.get("units")).cloned();
            if units(old) != units(new) {
                changes.push("Alterou unidades");
            }
            Some(format!(
                "Atualizou professor \"{user}\". {}",
                changes.join(", ")
            ))
        }
        ("bookings" | "room_bookings", "DELETE_ROOM_BOOKING") => {
            let room = text(old, "room_name").unwrap_or("Sala desconhecida");
            let user = text(old, "user_name").unwrap_or("Professor desconhecido");
            let unit = text(old, "room_unit").unwrap_or("");
            let period = match (
                local_timestamp(text(old, "start_ts"), offset, "%d/%m/%Y %H:%M"),
                local_timestamp(text(old, "end_ts"), offset, "%H:%M"),
            ) {
                (Some(start), Some(end)) => format!(" ({start} - {end})"),
                _ => String::new(),
            };
            Some(format!(
                "Excluiu reserva da sala \"{room}\" {unit}.\n• Responsável pela reserva: {user}\n• Período: {period}"
            ))
        }
        ("admins", "RESET_ADMIN_PASSWORD") => {
            let admin = text(new, "username")
                .or_else(|| text(old, "username"))
                .unwrap_or("Admin");
            Some(format!("Resetou a senha do administrador \"{admin}\"."))
        }
        _ => None,
    };

    let target = target_label(&entry.table_name).to_string();
    let details = details.unwrap_or_else(|| {
        format!(
            "Realizou ação {} em {target} (ID: {record}).",
            entry.action_type
        )
    });

    AuditSummary {
        action: action_label(&entry.action_type).into_owned(),
        target,
        details,
        icon: icon(&entry.action_type),
    }
}
