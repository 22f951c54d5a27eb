//! Client records: listing, CRUD, soft delete and case-officer assignment.

use super::{
    ServiceError, ServiceResult, is_unique_violation, push_client_scope,
    validation::{self, ValidationErrors},
};
use crate::models::{
    client::{
        Client, ClientRegion, ClientStatus, ClientView, ClientViewRow, Destination, VisaType,
    },
    page::{Page, PageRequest},
    user::User,
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::info;
use uuid::Uuid;

const VIEW_SELECT: &str = "SELECT c.*, \
     (SELECT COUNT(*) FROM documents d WHERE d.client_id = c.id) AS document_count, \
     u.username AS assignee_username, u.email AS assignee_email, \
     u.first_name AS assignee_first_name, u.last_name AS assignee_last_name \
     FROM clients c LEFT JOIN users u ON u.id = c.assigned_to WHERE 1 = 1";

/// Full set of editable fields, as sent to `POST` and `PUT`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientInput {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub destination_country: Destination,
    pub visa_type: VisaType,
    #[serde(default)]
    pub status: Option<ClientStatus>,
    #[serde(default)]
    pub region: Option<ClientRegion>,
}

/// Partial update, as sent to `PATCH`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub destination_country: Option<Destination>,
    pub visa_type: Option<VisaType>,
    pub status: Option<ClientStatus>,
    pub region: Option<ClientRegion>,
}

impl From<ClientInput> for ClientPatch {
    fn from(input: ClientInput) -> Self {
        Self {
            first_name: Some(input.first_name),
            last_name: Some(input.last_name),
            email: Some(input.email),
            phone: Some(input.phone),
            destination_country: Some(input.destination_country),
            visa_type: Some(input.visa_type),
            status: input.status,
            region: input.region,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientFilter {
    pub status: Option<ClientStatus>,
    pub region: Option<ClientRegion>,
    pub search: Option<String>,
}

#[derive(Clone)]
pub struct ClientService {
    db: SqlitePool,
}

impl ClientService {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn list(
        &self,
        actor: &User,
        filter: &ClientFilter,
        page: PageRequest,
    ) -> ServiceResult<Page<ClientView>> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM clients c WHERE 1 = 1");
        push_client_scope(&mut count, actor, "c");
        push_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.db).await?;

        let mut query = QueryBuilder::<Sqlite>::new(VIEW_SELECT);
        push_client_scope(&mut query, actor, "c");
        push_filter(&mut query, filter);
        query.push(" ORDER BY c.created_at DESC, c.id LIMIT ");
        query.push_bind(page.limit());
        query.push(" OFFSET ");
        query.push_bind(page.offset());
        let rows: Vec<ClientViewRow> = query.build_query_as().fetch_all(&self.db).await?;

        Ok(Page::new(
            page,
            total,
            rows.into_iter().map(ClientView::from).collect(),
        ))
    }

    pub async fn get(&self, actor: &User, id: Uuid) -> ServiceResult<ClientView> {
        let mut query = QueryBuilder::<Sqlite>::new(VIEW_SELECT);
        query.push(" AND c.id = ");
        query.push_bind(id);
        push_client_scope(&mut query, actor, "c");
        let row: Option<ClientViewRow> = query.build_query_as().fetch_optional(&self.db).await?;
        row.map(ClientView::from)
            .ok_or_else(|| ServiceError::not_found("client", id))
    }

    /// The bare row, if `actor` may see it.
    pub async fn find_visible(&self, actor: &User, id: Uuid) -> ServiceResult<Option<Client>> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT c.* FROM clients c WHERE c.id = ");
        query.push_bind(id);
        push_client_scope(&mut query, actor, "c");
        Ok(query.build_query_as().fetch_optional(&self.db).await?)
    }

    /// Creates a client. Clients created by non-staff users are assigned to them.
    pub async fn create(&self, actor: &User, input: ClientInput) -> ServiceResult<ClientView> {
        let mut errors = ValidationErrors::new();
        validate_fields(&ClientPatch::from(input.clone()), &mut errors);
        if !errors.is_empty() {
            return Err(errors.into());
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let assigned_to = (!actor.is_staff).then_some(actor.id);
        let result = sqlx::query(
            "INSERT INTO clients (id, first_name, last_name, email, phone, destination_country,
                                  visa_type, status, region, assigned_to, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(input.first_name.trim())
        .bind(input.last_name.trim())
        .bind(input.email.trim())
        .bind(input.phone.trim())
        .bind(input.destination_country)
        .bind(input.visa_type)
        .bind(input.status.unwrap_or(ClientStatus::Inquiry))
        .bind(input.region.unwrap_or(ClientRegion::Australia))
        .bind(assigned_to)
        .bind(now)
        .bind(now)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Err(duplicate_email()),
            Err(err) => return Err(err.into()),
        }
        info!(client_id = %id, actor = %actor.username, "client created");
        self.get(actor, id).await
    }

    /// Applies `patch` over the stored row. `PUT` sends every field.
    pub async fn update(&self, actor: &User, id: Uuid, patch: ClientPatch) -> ServiceResult<ClientView> {
        let current = self
            .find_visible(actor, id)
            .await?
            .ok_or_else(|| ServiceError::not_found("client", id))?;

        let mut errors = ValidationErrors::new();
        validate_fields(&patch, &mut errors);
        if !errors.is_empty() {
            return Err(errors.into());
        }

        let result = sqlx::query(
            "UPDATE clients SET first_name = ?, last_name = ?, email = ?, phone = ?,
                    destination_country = ?, visa_type = ?, status = ?, region = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(patch.first_name.as_deref().map(str::trim).unwrap_or(&current.first_name))
        .bind(patch.last_name.as_deref().map(str::trim).unwrap_or(&current.last_name))
        .bind(patch.email.as_deref().map(str::trim).unwrap_or(&current.email))
        .bind(patch.phone.as_deref().map(str::trim).unwrap_or(&current.phone))
        .bind(patch.destination_country.unwrap_or(current.destination_country))
        .bind(patch.visa_type.unwrap_or(current.visa_type))
        .bind(patch.status.unwrap_or(current.status))
        .bind(patch.region.unwrap_or(current.region))
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Err(duplicate_email()),
            Err(err) => return Err(err.into()),
        }
        if let Some(status) = patch.status
            && status != current.status
        {
            info!(client_id = %id, from = %current.status, to = %status, "client status changed");
        }
        self.get(actor, id).await
    }

    /// Sets `deleted_at`; documents stay but leave every read path with the client.
    pub async fn soft_delete(&self, actor: &User, id: Uuid) -> ServiceResult<()> {
        if !actor.is_staff {
            return Err(ServiceError::staff_only());
        }
        let result = sqlx::query(
            "UPDATE clients SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::not_found("client", id));
        }
        info!(client_id = %id, actor = %actor.username, "client soft-deleted");
        Ok(())
    }

    pub async fn assign(&self, actor: &User, id: Uuid, user_id: Uuid) -> ServiceResult<ClientView> {
        if !actor.is_staff {
            return Err(ServiceError::staff_only());
        }
        self.find_visible(actor, id)
            .await?
            .ok_or_else(|| ServiceError::not_found("client", id))?;

        let user_exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
        if user_exists.is_none() {
            return Err(ServiceError::not_found("user", user_id));
        }

        sqlx::query("UPDATE clients SET assigned_to = ?, updated_at = ? WHERE id = ?")
            .bind(user_id)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.db)
            .await?;
        info!(client_id = %id, %user_id, "client assigned");
        self.get(actor, id).await
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ClientFilter) {
    if let Some(status) = filter.status {
        builder.push(" AND c.status = ");
        builder.push_bind(status);
    }
    if let Some(region) = filter.region {
        builder.push(" AND c.region = ");
        builder.push_bind(region);
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", escape_like(search));
        builder.push(" AND (c.first_name LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" ESCAPE '\\' OR c.last_name LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" ESCAPE '\\' OR c.email LIKE ");
        builder.push_bind(pattern);
        builder.push(" ESCAPE '\\')");
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn validate_fields(patch: &ClientPatch, errors: &mut ValidationErrors) {
    if let Some(first_name) = &patch.first_name {
        validation::validate_name("first_name", first_name, errors);
    }
    if let Some(last_name) = &patch.last_name {
        validation::validate_name("last_name", last_name, errors);
    }
    if let Some(email) = &patch.email {
        validation::validate_email(email.trim(), errors);
    }
    if let Some(phone) = &patch.phone {
        validation::validate_phone(phone, errors);
    }
}

fn duplicate_email() -> ServiceError {
    ValidationErrors::single("email", "client with this email already exists").into()
}
