//! User and workspace records.

use diesel::prelude::*;
use uuid::Uuid;

use crate::auth::{Role, Subject};
use crate::models::{NewUser, NewWorkspace, User, Workspace};
use crate::schema::{users, workspaces};

pub struct UserRepo;

impl UserRepo {
    /// Registers a user together with their home workspace. The creator
    /// becomes the workspace owner.
    pub fn create_with_workspace(
        conn: &mut PgConnection,
        email: &str,
        password_hash: &str,
        workspace_name: &str,
    ) -> Result<(User, Workspace), diesel::result::Error> {
        conn.transaction(|conn| {
            let workspace: Workspace = diesel::insert_into(workspaces::table)
                .values(&NewWorkspace {
                    id: Uuid::new_v4(),
                    name: workspace_name.to_string(),
                    plan: "free".to_string(),
                })
                .returning(Workspace::as_returning())
                .get_result(conn)?;

            let user: User = diesel::insert_into(users::table)
                .values(&NewUser {
                    workspace_id: workspace.id,
                    email: email.to_lowercase(),
                    password_hash: password_hash.to_string(),
                    role: Role::Owner.as_str().to_string(),
                })
                .returning(User::as_returning())
                .get_result(conn)?;

            Ok((user, workspace))
        })
    }

    /// Login-path lookup. Runs before authentication, so it is keyed by the
    /// globally-unique email rather than a workspace.
    pub fn find_by_email(
        conn: &mut PgConnection,
        email: &str,
    ) -> Result<Option<User>, diesel::result::Error> {
        users::table
            .filter(users::email.eq(email.to_lowercase()))
            .select(User::as_select())
            .first(conn)
            .optional()
    }

    /// Token-rotation path: the session row, not a request subject, vouches
    /// for the user id.
    pub fn unscoped_get(
        conn: &mut PgConnection,
        user_id: Uuid,
    ) -> Result<Option<User>, diesel::result::Error> {
        users::table
            .filter(users::id.eq(user_id))
            .select(User::as_select())
            .first(conn)
            .optional()
    }

    pub fn get(
        conn: &mut PgConnection,
        subject: &Subject,
        user_id: Uuid,
    ) -> Result<Option<User>, diesel::result::Error> {
        users::table
            .filter(users::id.eq(user_id))
            .filter(users::workspace_id.eq(subject.workspace_id))
            .select(User::as_select())
            .first(conn)
            .optional()
    }

    pub fn get_workspace(
        conn: &mut PgConnection,
        subject: &Subject,
    ) -> Result<Option<Workspace>, diesel::result::Error> {
        workspaces::table
            .filter(workspaces::id.eq(subject.workspace_id))
            .select(Workspace::as_select())
            .first(conn)
            .optional()
    }

    /// Applied when a login verifies against a hash produced with an
    /// outdated cost parameter.
    pub fn update_password_hash(
        conn: &mut PgConnection,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<(), diesel::result::Error> {
        diesel::update(users::table.find(user_id))
            .set((
                users::password_hash.eq(password_hash),
                users::updated_at.eq(diesel::dsl::now),
            ))
            .execute(conn)?;
        Ok(())
    }
}
