//! Transformation preset persistence.
//!
//! Visibility: a preset is readable by any workspace member iff it is shared
//! or the caller owns it. Only the owner may update or delete. A private
//! preset owned by someone else reads as absent.

use diesel::prelude::*;
use uuid::Uuid;

use crate::auth::Subject;
use crate::models::{NewTransformationPreset, TransformationPreset};
use crate::schema::transformation_presets;

pub struct PresetRepo;

impl PresetRepo {
    pub fn create(
        conn: &mut PgConnection,
        preset: &NewTransformationPreset,
    ) -> Result<TransformationPreset, diesel::result::Error> {
        diesel::insert_into(transformation_presets::table)
            .values(preset)
            .returning(TransformationPreset::as_returning())
            .get_result(conn)
    }

    pub fn get_accessible(
        conn: &mut PgConnection,
        subject: &Subject,
        preset_id: Uuid,
    ) -> Result<Option<TransformationPreset>, diesel::result::Error> {
        transformation_presets::table
            .filter(transformation_presets::id.eq(preset_id))
            .filter(transformation_presets::workspace_id.eq(subject.workspace_id))
            .filter(
                transformation_presets::is_shared
                    .eq(true)
                    .or(transformation_presets::user_id.eq(subject.user_id)),
            )
            .select(TransformationPreset::as_select())
            .first(conn)
            .optional()
    }

    /// Most-used presets first, then by name, mirroring how clients surface
    /// them in pickers.
    pub fn list_accessible(
        conn: &mut PgConnection,
        subject: &Subject,
    ) -> Result<Vec<TransformationPreset>, diesel::result::Error> {
        transformation_presets::table
            .filter(transformation_presets::workspace_id.eq(subject.workspace_id))
            .filter(
                transformation_presets::is_shared
                    .eq(true)
                    .or(transformation_presets::user_id.eq(subject.user_id)),
            )
            .order((
                transformation_presets::usage_count.desc(),
                transformation_presets::name.asc(),
            ))
            .select(TransformationPreset::as_select())
            .load(conn)
    }

    /// Owner-only update. The filter includes the owner, so a non-owner
    /// update affects zero rows; the handler decides between 403 and 404
    /// based on what `get_accessible` showed the caller.
    #[allow(clippy::too_many_arguments)]
    pub fn update_owned(
        conn: &mut PgConnection,
        subject: &Subject,
        preset_id: Uuid,
        name: Option<&str>,
        description: Option<Option<&str>>,
        parameters: Option<&serde_json::Value>,
        is_shared: Option<bool>,
    ) -> Result<Option<TransformationPreset>, diesel::result::Error> {
        conn.transaction(|conn| {
            let existing: Option<TransformationPreset> = transformation_presets::table
                .filter(transformation_presets::id.eq(preset_id))
                .filter(transformation_presets::workspace_id.eq(subject.workspace_id))
                .filter(transformation_presets::user_id.eq(subject.user_id))
                .select(TransformationPreset::as_select())
                .first(conn)
                .optional()?;

            let Some(existing) = existing else {
                return Ok(None);
            };

            let updated = diesel::update(transformation_presets::table.find(existing.id))
                .set((
                    transformation_presets::name.eq(name.unwrap_or(&existing.name)),
                    transformation_presets::description.eq(match description {
                        Some(d) => d.map(|s| s.to_string()),
                        None => existing.description.clone(),
                    }),
                    transformation_presets::parameters
                        .eq(parameters.unwrap_or(&existing.parameters)),
                    transformation_presets::is_shared.eq(is_shared.unwrap_or(existing.is_shared)),
                    transformation_presets::updated_at.eq(diesel::dsl::now),
                ))
                .returning(TransformationPreset::as_returning())
                .get_result(conn)?;

            Ok(Some(updated))
        })
    }

    pub fn delete_owned(
        conn: &mut PgConnection,
        subject: &Subject,
        preset_id: Uuid,
    ) -> Result<bool, diesel::result::Error> {
        let deleted = diesel::delete(
            transformation_presets::table
                .filter(transformation_presets::id.eq(preset_id))
                .filter(transformation_presets::workspace_id.eq(subject.workspace_id))
                .filter(transformation_presets::user_id.eq(subject.user_id)),
        )
        .execute(conn)?;

        Ok(deleted > 0)
    }

    /// Counted once per successful transformation enqueue, never per retry.
    pub fn increment_usage(
        conn: &mut PgConnection,
        subject: &Subject,
        preset_id: Uuid,
    ) -> Result<(), diesel::result::Error> {
        diesel::update(
            transformation_presets::table
                .filter(transformation_presets::id.eq(preset_id))
                .filter(transformation_presets::workspace_id.eq(subject.workspace_id)),
        )
        .set(transformation_presets::usage_count.eq(transformation_presets::usage_count + 1))
        .execute(conn)?;
        Ok(())
    }
}
