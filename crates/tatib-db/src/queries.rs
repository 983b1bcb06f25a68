use crate::models::{NewStudent, NewViolation, StudentRow, UserRow, ViolationRow};
use crate::{Database, now};
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, username, password_hash, role, created_at, updated_at";

const STUDENT_COLUMNS: &str =
    "id, nisn, name, class, parent_name, parent_whatsapp, created_at, updated_at";

const VIOLATION_COLUMNS: &str = "id, student_id, violation_type, location, description, photo_url, \
     violation_time, reported_by, whatsapp_sent, whatsapp_sent_at, created_at, updated_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, username: &str, password_hash: &str, role: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO users (username, password_hash, role, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                (username, password_hash, role, &ts),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS);
            conn.query_row(&sql, [username], user_from_row).optional()
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM users ORDER BY username ASC", USER_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_users(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?))
    }

    /// Returns false when no user had that id.
    pub fn delete_user(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM users WHERE id = ?1", [id])? > 0))
    }

    pub fn count_violations_reported_by(&self, user_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM violations WHERE reported_by = ?1",
                [user_id],
                |r| r.get(0),
            )?)
        })
    }

    // -- Students --

    pub fn create_student(&self, student: &NewStudent<'_>) -> Result<i64> {
        self.with_conn(|conn| insert_student(conn, student, &now()))
    }

    /// Insert a batch of students in one transaction. Any failure rolls back
    /// the whole batch.
    pub fn create_students(&self, students: &[NewStudent<'_>]) -> Result<Vec<i64>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let ts = now();
            let mut ids = Vec::with_capacity(students.len());
            for student in students {
                ids.push(insert_student(&tx, student, &ts)?);
            }
            tx.commit()?;
            Ok(ids)
        })
    }

    pub fn get_student(&self, id: i64) -> Result<Option<StudentRow>> {
        self.with_conn(|conn| query_student_by_id(conn, id))
    }

    pub fn get_student_by_nisn(&self, nisn: &str) -> Result<Option<StudentRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM students WHERE nisn = ?1", STUDENT_COLUMNS);
            conn.query_row(&sql, [nisn], student_from_row).optional()
        })
    }

    /// List students ordered by class then name. `search` matches a
    /// substring of the name or NISN.
    pub fn list_students(&self, class: Option<&str>, search: Option<&str>) -> Result<Vec<StudentRow>> {
        let pattern = search.map(|s| format!("%{}%", s));
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM students
                 WHERE (?1 IS NULL OR class = ?1)
                   AND (?2 IS NULL OR name LIKE ?2 OR nisn LIKE ?2)
                 ORDER BY class ASC, name ASC",
                STUDENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![class, pattern], student_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Read-modify-write of a student under a single lock. Returns `None`
    /// when the id does not exist.
    pub fn update_student<F>(&self, id: i64, apply: F) -> Result<Option<StudentRow>>
    where
        F: FnOnce(&mut StudentRow),
    {
        self.with_conn(|conn| {
            let Some(mut row) = query_student_by_id(conn, id)? else {
                return Ok(None);
            };
            apply(&mut row);
            row.updated_at = now();
            conn.execute(
                "UPDATE students
                 SET nisn = ?1, name = ?2, class = ?3, parent_name = ?4,
                     parent_whatsapp = ?5, updated_at = ?6
                 WHERE id = ?7",
                rusqlite::params![
                    row.nisn,
                    row.name,
                    row.class,
                    row.parent_name,
                    row.parent_whatsapp,
                    row.updated_at,
                    id,
                ],
            )?;
            Ok(Some(row))
        })
    }

    pub fn delete_student(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM students WHERE id = ?1", [id])? > 0))
    }

    pub fn count_violations_for_student(&self, student_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM violations WHERE student_id = ?1",
                [student_id],
                |r| r.get(0),
            )?)
        })
    }

    // -- Violations --

    pub fn insert_violation(&self, violation: &NewViolation<'_>) -> Result<i64> {
        self.with_conn(|conn| {
            let ts = now();
            conn.execute(
                "INSERT INTO violations (student_id, violation_type, location, description, photo_url,
                                         violation_time, reported_by, whatsapp_sent, whatsapp_sent_at,
                                         created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, ?8, ?8)",
                rusqlite::params![
                    violation.student_id,
                    violation.violation_type,
                    violation.location,
                    violation.description,
                    violation.photo_url,
                    violation.violation_time,
                    violation.reported_by,
                    ts,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_violation(&self, id: i64) -> Result<Option<ViolationRow>> {
        self.with_conn(|conn| query_violation_by_id(conn, id))
    }

    /// Most recent incident first; ties broken by newest id.
    pub fn list_violations(
        &self,
        student_id: Option<i64>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ViolationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM violations
                 WHERE (?1 IS NULL OR student_id = ?1)
                 ORDER BY violation_time DESC, id DESC
                 LIMIT ?2 OFFSET ?3",
                VIOLATION_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![student_id, limit, offset], violation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Read-modify-write of a violation under a single lock. `updated_at` is
    /// refreshed after `apply` runs. Returns `None` when the id does not
    /// exist.
    pub fn update_violation<F>(&self, id: i64, apply: F) -> Result<Option<ViolationRow>>
    where
        F: FnOnce(&mut ViolationRow),
    {
        self.with_conn(|conn| {
            let Some(mut row) = query_violation_by_id(conn, id)? else {
                return Ok(None);
            };
            apply(&mut row);
            row.updated_at = now();
            conn.execute(
                "UPDATE violations
                 SET student_id = ?1, violation_type = ?2, location = ?3, description = ?4,
                     photo_url = ?5, violation_time = ?6, whatsapp_sent = ?7,
                     whatsapp_sent_at = ?8, updated_at = ?9
                 WHERE id = ?10",
                rusqlite::params![
                    row.student_id,
                    row.violation_type,
                    row.location,
                    row.description,
                    row.photo_url,
                    row.violation_time,
                    row.whatsapp_sent,
                    row.whatsapp_sent_at,
                    row.updated_at,
                    id,
                ],
            )?;
            Ok(Some(row))
        })
    }

    pub fn delete_violation(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM violations WHERE id = ?1", [id])? > 0))
    }

    /// Set the notification flag and stamp it with `sent_at`, whatever the
    /// previous state was.
    pub fn mark_whatsapp_sent(&self, id: i64, sent_at: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE violations
                 SET whatsapp_sent = 1, whatsapp_sent_at = ?1, updated_at = ?1
                 WHERE id = ?2",
                rusqlite::params![sent_at, id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Returns (total, notified).
    pub fn violation_counts(&self) -> Result<(i64, i64)> {
        self.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(whatsapp_sent), 0) FROM violations",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?)
        })
    }

    /// Per-type counts, most frequent first.
    pub fn violation_type_counts(&self) -> Result<Vec<(String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT violation_type, COUNT(*) AS n FROM violations
                 GROUP BY violation_type
                 ORDER BY n DESC, violation_type ASC",
            )?;
            let rows = stmt
                .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn insert_student(conn: &Connection, student: &NewStudent<'_>, ts: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO students (nisn, name, class, parent_name, parent_whatsapp, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        rusqlite::params![
            student.nisn,
            student.name,
            student.class,
            student.parent_name,
            student.parent_whatsapp,
            ts,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    conn.query_row(&sql, [id], user_from_row).optional()
}

fn query_student_by_id(conn: &Connection, id: i64) -> Result<Option<StudentRow>> {
    let sql = format!("SELECT {} FROM students WHERE id = ?1", STUDENT_COLUMNS);
    conn.query_row(&sql, [id], student_from_row).optional()
}

fn query_violation_by_id(conn: &Connection, id: i64) -> Result<Option<ViolationRow>> {
    let sql = format!("SELECT {} FROM violations WHERE id = ?1", VIOLATION_COLUMNS);
    conn.query_row(&sql, [id], violation_from_row).optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        role: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: row.get(0)?,
        nisn: row.get(1)?,
        name: row.get(2)?,
        class: row.get(3)?,
        parent_name: row.get(4)?,
        parent_whatsapp: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn violation_from_row(row: &Row<'_>) -> rusqlite::Result<ViolationRow> {
    Ok(ViolationRow {
        id: row.get(0)?,
        student_id: row.get(1)?,
        violation_type: row.get(2)?,
        location: row.get(3)?,
        description: row.get(4)?,
        photo_url: row.get(5)?,
        violation_time: row.get(6)?,
        reported_by: row.get(7)?,
        whatsapp_sent: row.get(8)?,
        whatsapp_sent_at: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
