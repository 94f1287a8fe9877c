use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::SgeError;

/// Standard response envelope: `{ok, message, data}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub ok: bool,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }

    /// Envelope with data but no message (catalog listings).
    pub fn data(data: T) -> Self {
        Self {
            ok: true,
            message: None,
            data: Some(data),
        }
    }
}

impl Envelope<()> {
    /// Envelope carrying only a confirmation message, `data: null`.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
            data: None,
        }
    }
}

// ── Alumnos ───────────────────────────────────────────────────────────

/// List projection: FK ids replaced by display names, plus the entity name
/// of the assigned vacancy when there is one.
#[derive(Debug, Clone, Serialize)]
pub struct AlumnoResumen {
    pub id_alumno: i64,
    pub nif_nie: String,
    pub nombre: String,
    pub apellidos: String,
    pub fecha_nacimiento: NaiveDate,
    pub curso: i64,
    pub telefono: String,
    pub direccion: Option<String>,
    pub cp: Option<String>,
    pub localidad: Option<String>,
    pub observaciones: Option<String>,
    pub entidad_centro: String,
    pub ciclo: String,
    pub provincia: Option<String>,
    pub vacante_asignada: Option<String>,
}

/// Detail projection: the list fields plus the raw FK ids edit forms need.
#[derive(Debug, Clone, Serialize)]
pub struct AlumnoDetalle {
    pub id_alumno: i64,
    pub nif_nie: String,
    pub nombre: String,
    pub apellidos: String,
    pub fecha_nacimiento: NaiveDate,
    pub id_entidad_centro: i64,
    pub id_ciclo: i64,
    pub curso: i64,
    pub telefono: String,
    pub direccion: Option<String>,
    pub cp: Option<String>,
    pub localidad: Option<String>,
    pub id_provincia: Option<i64>,
    pub observaciones: Option<String>,
    pub entidad_centro: String,
    pub ciclo: String,
    pub provincia: Option<String>,
    pub vacante_asignada: Option<String>,
}

/// Create/update payload. Updates are full replaces with the same required
/// fields as create.
#[derive(Debug, Clone, Deserialize)]
pub struct AlumnoPayload {
    pub nif_nie: String,
    pub nombre: String,
    pub apellidos: String,
    pub fecha_nacimiento: NaiveDate,
    pub id_entidad_centro: i64,
    pub id_ciclo: i64,
    pub curso: i64,
    pub telefono: String,
    pub direccion: Option<String>,
    pub cp: Option<String>,
    pub localidad: Option<String>,
    pub id_provincia: Option<i64>,
    pub observaciones: Option<String>,
}

impl AlumnoPayload {
    pub fn validate(&self) -> Result<(), SgeError> {
        require_len("nif_nie", &self.nif_nie, 3, 15)?;
        require_len("nombre", &self.nombre, 1, 100)?;
        require_len("apellidos", &self.apellidos, 1, 150)?;
        require_len("telefono", &self.telefono, 3, 20)?;
        if !(1..=2).contains(&self.curso) {
            return Err(SgeError::Validation("El curso debe ser 1 o 2".into()));
        }
        optional_max("direccion", self.direccion.as_deref(), 150)?;
        optional_max("cp", self.cp.as_deref(), 10)?;
        optional_max("localidad", self.localidad.as_deref(), 80)?;
        Ok(())
    }
}

// ── Vacantes ──────────────────────────────────────────────────────────

/// List projection: occupancy count and the surname-ordered roll of
/// assigned students as a single comma-separated string.
#[derive(Debug, Clone, Serialize)]
pub struct VacanteResumen {
    pub id_vacante: i64,
    pub curso: i64,
    pub num_vacantes: i64,
    pub observaciones: Option<String>,
    pub entidad: String,
    pub ciclo: String,
    pub num_alumnos: i64,
    pub listado_alumnos: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VacantePayload {
    pub id_entidad: i64,
    pub id_ciclo: i64,
    pub curso: i64,
    pub num_vacantes: i64,
    pub observaciones: Option<String>,
}

impl VacantePayload {
    pub fn validate(&self) -> Result<(), SgeError> {
        if !(1..=2).contains(&self.curso) {
            return Err(SgeError::Validation("El curso debe ser 1 o 2".into()));
        }
        if self.num_vacantes < 0 {
            return Err(SgeError::Validation(
                "num_vacantes no puede ser negativo".into(),
            ));
        }
        Ok(())
    }
}

/// Candidate row for `alumnos-disponibles`: unassigned students matching a
/// vacancy's cycle and course.
#[derive(Debug, Clone, Serialize)]
pub struct CandidatoAlumno {
    pub id_alumno: i64,
    pub nombre: String,
    pub apellidos: String,
    pub nif_nie: String,
}

// ── Catálogos ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Provincia {
    pub id_provincia: i64,
    pub provincia: String,
}

// ── Helpers ───────────────────────────────────────────────────────────

fn require_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), SgeError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(SgeError::Validation(format!(
            "El campo {field} debe tener entre {min} y {max} caracteres"
        )));
    }
    Ok(())
}

fn optional_max(field: &str, value: Option<&str>, max: usize) -> Result<(), SgeError> {
    if let Some(v) = value {
        if v.chars().count() > max {
            return Err(SgeError::Validation(format!(
                "El campo {field} no puede superar {max} caracteres"
            )));
        }
    }
    Ok(())
}
