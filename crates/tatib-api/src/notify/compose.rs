use chrono::{Datelike, FixedOffset, Timelike, Weekday};

use tatib_db::Database;
use tatib_types::models::{Student, Violation};

use crate::error::{AppError, AppResult};

const MONTHS: [&str; 12] = [
    "Januari", "Februari", "Maret", "April", "Mei", "Juni", "Juli", "Agustus", "September",
    "Oktober", "November", "Desember",
];

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Senin",
        Weekday::Tue => "Selasa",
        Weekday::Wed => "Rabu",
        Weekday::Thu => "Kamis",
        Weekday::Fri => "Jumat",
        Weekday::Sat => "Sabtu",
        Weekday::Sun => "Minggu",
    }
}

/// Renders violations into the Indonesian parent notification.
#[derive(Debug, Clone)]
pub struct Composer {
    school_name: String,
    offset: FixedOffset,
}

impl Composer {
    /// `offset` is the school's local UTC offset, used for the incident date
    /// and time shown to parents.
    pub fn new(school_name: impl Into<String>, offset: FixedOffset) -> Self {
        Self {
            school_name: school_name.into(),
            offset,
        }
    }

    pub fn school_name(&self) -> &str {
        &self.school_name
    }

    pub fn compose(&self, violation: &Violation, student: &Student) -> String {
        let local = violation.violation_time.with_timezone(&self.offset);
        let date = format!(
            "{}, {} {} {}",
            weekday_name(local.weekday()),
            local.day(),
            MONTHS[local.month0() as usize],
            local.year()
        );
        let time = format!("{:02}.{:02}", local.hour(), local.minute());

        let mut lines = vec![
            format!("Yth. Bapak/Ibu {},", student.parent_name),
            String::new(),
            "Dengan hormat, kami sampaikan bahwa putra/putri Bapak/Ibu:".to_string(),
            format!("Nama: {}", student.name),
            format!("Kelas: {}", student.class),
            format!("NISN: {}", student.nisn),
            String::new(),
            "telah melakukan pelanggaran tata tertib sekolah dengan rincian:".to_string(),
            format!("Hari/Tanggal: {}", date),
            format!("Waktu: {}", time),
            format!("Jenis Pelanggaran: {}", violation.violation_type),
            format!("Lokasi: {}", violation.location),
        ];

        if let Some(description) = present(violation.description.as_deref()) {
            lines.push(format!("Keterangan: {}", description));
        }
        if let Some(photo_url) = present(violation.photo_url.as_deref()) {
            lines.push(format!("Bukti foto: {}", photo_url));
        }

        lines.extend([
            String::new(),
            "Mohon kerja sama Bapak/Ibu untuk memberikan bimbingan kepada putra/putri di rumah."
                .to_string(),
            String::new(),
            "Hormat kami,".to_string(),
            self.school_name.clone(),
        ]);

        lines.join("\n")
    }

    /// Load the violation and its student, then compose.
    pub fn compose_by_id(&self, db: &Database, violation_id: i64) -> AppResult<(String, Student, Violation)> {
        let violation: Violation = db
            .get_violation(violation_id)?
            .ok_or_else(|| AppError::NotFound(format!("Violation not found: {}", violation_id)))?
            .into();
        let student: Student = db
            .get_student(violation.student_id)?
            .ok_or_else(|| AppError::NotFound(format!("Student not found: {}", violation.student_id)))?
            .into();
        let message = self.compose(&violation, &student);
        Ok((message, student, violation))
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
