use sqlx::sqlite::SqliteQueryResult;

use crate::error::QueueError;

/// Turns "no rows were affected" into NotFound, for updates that must land
/// on an existing row.
pub(crate) fn throw_if_no_rows(res: SqliteQueryResult, id: &str) -> Result<(), QueueError> {
    if res.rows_affected() == 0 {
        Err(QueueError::NotFound(id.to_owned()))
    } else {
        Ok(())
    }
}
