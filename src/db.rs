use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension, params};

use crate::auth::AuthUser;
use crate::errors::SgeError;
use crate::models::{
    AlumnoDetalle, AlumnoPayload, AlumnoResumen, CandidatoAlumno, Provincia, VacantePayload,
    VacanteResumen,
};

/// Async-safe handle to the SGE database.
///
/// Wraps `SgeDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`. A whole business operation
/// runs inside one `call` closure, so the mutex serializes its reads and
/// writes as a unit: the capacity check and the insert that follows it
/// cannot interleave with another request.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<SgeDb>>,
}

impl DbHandle {
    pub fn new(db: SgeDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R, SgeError>
    where
        F: FnOnce(&SgeDb) -> Result<R, SgeError> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| SgeError::Database(anyhow::anyhow!("DB lock poisoned: {}", e)))?;
            f(&guard)
        })
        .await
        .map_err(|e| SgeError::Database(anyhow::anyhow!("DB task panicked: {}", e)))?
    }
}

pub struct SgeDb {
    conn: Connection,
}

impl SgeDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self, SgeError> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self, SgeError> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<(), SgeError> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<(), SgeError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS sgi_tipos_entidad (
                    id_tipo_entidad INTEGER PRIMARY KEY AUTOINCREMENT,
                    tipo_entidad TEXT NOT NULL UNIQUE
                );

                CREATE TABLE IF NOT EXISTS sgi_entidades (
                    id_entidad INTEGER PRIMARY KEY AUTOINCREMENT,
                    entidad TEXT NOT NULL,
                    id_tipo_entidad INTEGER NOT NULL REFERENCES sgi_tipos_entidad(id_tipo_entidad)
                );

                CREATE TABLE IF NOT EXISTS sgi_ciclos (
                    id_ciclo INTEGER PRIMARY KEY AUTOINCREMENT,
                    ciclo TEXT NOT NULL UNIQUE
                );

                CREATE TABLE IF NOT EXISTS sgi_provincias (
                    id_provincia INTEGER PRIMARY KEY AUTOINCREMENT,
                    provincia TEXT NOT NULL UNIQUE
                );

                CREATE TABLE IF NOT EXISTS sgi_usuarios (
                    id_usuario INTEGER PRIMARY KEY AUTOINCREMENT,
                    usuario TEXT NOT NULL UNIQUE,
                    id_rol INTEGER NOT NULL DEFAULT 1,
                    token_sesion TEXT
                );

                CREATE TABLE IF NOT EXISTS sgi_alumnos (
                    id_alumno INTEGER PRIMARY KEY AUTOINCREMENT,
                    nif_nie TEXT NOT NULL UNIQUE,
                    nombre TEXT NOT NULL,
                    apellidos TEXT NOT NULL,
                    fecha_nacimiento TEXT NOT NULL,
                    id_entidad_centro INTEGER NOT NULL REFERENCES sgi_entidades(id_entidad),
                    id_ciclo INTEGER NOT NULL REFERENCES sgi_ciclos(id_ciclo),
                    curso INTEGER NOT NULL,
                    telefono TEXT NOT NULL,
                    direccion TEXT,
                    cp TEXT,
                    localidad TEXT,
                    id_provincia INTEGER REFERENCES sgi_provincias(id_provincia),
                    observaciones TEXT
                );

                CREATE TABLE IF NOT EXISTS sgi_vacantes (
                    id_vacante INTEGER PRIMARY KEY AUTOINCREMENT,
                    id_entidad INTEGER NOT NULL REFERENCES sgi_entidades(id_entidad),
                    id_ciclo INTEGER NOT NULL REFERENCES sgi_ciclos(id_ciclo),
                    curso INTEGER NOT NULL,
                    num_vacantes INTEGER NOT NULL DEFAULT 0,
                    observaciones TEXT,
                    UNIQUE (id_entidad, id_ciclo, curso)
                );

                CREATE TABLE IF NOT EXISTS sgi_vacantes_x_alumnos (
                    id_vacante_x_alumno INTEGER PRIMARY KEY AUTOINCREMENT,
                    id_vacante INTEGER NOT NULL REFERENCES sgi_vacantes(id_vacante),
                    id_alumno INTEGER NOT NULL UNIQUE REFERENCES sgi_alumnos(id_alumno)
                );

                CREATE INDEX IF NOT EXISTS idx_alumnos_ciclo_curso ON sgi_alumnos(id_ciclo, curso);
                CREATE INDEX IF NOT EXISTS idx_vxa_vacante ON sgi_vacantes_x_alumnos(id_vacante);
                CREATE INDEX IF NOT EXISTS idx_usuarios_token ON sgi_usuarios(token_sesion);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Sesiones ──────────────────────────────────────────────────────

    /// Exact-match lookup of a bearer token against the sessions table.
    /// Presence of a row is sufficient; there is no expiry.
    pub fn find_session(&self, token: &str) -> Result<Option<AuthUser>, SgeError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id_usuario, usuario, id_rol FROM sgi_usuarios
                 WHERE token_sesion = ?1 LIMIT 1",
            )
            .context("Failed to prepare session lookup")?;
        let mut rows = stmt
            .query_map(params![token], |row| {
                Ok(AuthUser {
                    id_usuario: row.get(0)?,
                    usuario: row.get(1)?,
                    id_rol: row.get(2)?,
                })
            })
            .context("Failed to query session")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read session row")?)),
            None => Ok(None),
        }
    }

    /// Readiness probe: `SELECT 1` through the live connection.
    pub fn health_check(&self) -> Result<i64, SgeError> {
        let value: i64 = self
            .conn
            .query_row("SELECT 1", [], |row| row.get(0))
            .context("Health query failed")?;
        Ok(value)
    }

    // ── Catálogos ─────────────────────────────────────────────────────

    pub fn list_provincias(&self) -> Result<Vec<Provincia>, SgeError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id_provincia, provincia FROM sgi_provincias ORDER BY provincia")
            .context("Failed to prepare list_provincias")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Provincia {
                    id_provincia: row.get(0)?,
                    provincia: row.get(1)?,
                })
            })
            .context("Failed to query provincias")?;
        let mut provincias = Vec::new();
        for row in rows {
            provincias.push(row.context("Failed to read provincia row")?);
        }
        Ok(provincias)
    }

    pub fn insert_tipo_entidad(&self, tipo: &str) -> Result<i64, SgeError> {
        self.conn
            .execute(
                "INSERT INTO sgi_tipos_entidad (tipo_entidad) VALUES (?1)",
                params![tipo],
            )
            .context("Failed to insert tipo_entidad")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_entidad(&self, entidad: &str, id_tipo_entidad: i64) -> Result<i64, SgeError> {
        self.conn
            .execute(
                "INSERT INTO sgi_entidades (entidad, id_tipo_entidad) VALUES (?1, ?2)",
                params![entidad, id_tipo_entidad],
            )
            .context("Failed to insert entidad")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_ciclo(&self, ciclo: &str) -> Result<i64, SgeError> {
        self.conn
            .execute("INSERT INTO sgi_ciclos (ciclo) VALUES (?1)", params![ciclo])
            .context("Failed to insert ciclo")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_provincia(&self, provincia: &str) -> Result<i64, SgeError> {
        self.conn
            .execute(
                "INSERT INTO sgi_provincias (provincia) VALUES (?1)",
                params![provincia],
            )
            .context("Failed to insert provincia")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_usuario(
        &self,
        usuario: &str,
        id_rol: i64,
        token_sesion: Option<&str>,
    ) -> Result<i64, SgeError> {
        self.conn
            .execute(
                "INSERT INTO sgi_usuarios (usuario, id_rol, token_sesion) VALUES (?1, ?2, ?3)",
                params![usuario, id_rol, token_sesion],
            )
            .context("Failed to insert usuario")?;
        Ok(self.conn.last_insert_rowid())
    }

    // ── Alumnos ───────────────────────────────────────────────────────

    const ALUMNO_JOINS: &'static str = "
        FROM sgi_alumnos a
        JOIN sgi_entidades e ON e.id_entidad = a.id_entidad_centro
        JOIN sgi_ciclos c ON c.id_ciclo = a.id_ciclo
        LEFT JOIN sgi_provincias p ON p.id_provincia = a.id_provincia
        LEFT JOIN sgi_vacantes_x_alumnos vxa ON vxa.id_alumno = a.id_alumno
        LEFT JOIN sgi_vacantes v ON v.id_vacante = vxa.id_vacante
        LEFT JOIN sgi_entidades ev ON ev.id_entidad = v.id_entidad";

    pub fn list_alumnos(&self) -> Result<Vec<AlumnoResumen>, SgeError> {
        let sql = format!(
            "SELECT
                a.id_alumno, a.nif_nie, a.nombre, a.apellidos, a.fecha_nacimiento,
                a.curso, a.telefono, a.direccion, a.cp, a.localidad, a.observaciones,
                e.entidad AS entidad_centro,
                c.ciclo AS ciclo,
                p.provincia AS provincia,
                ev.entidad AS vacante_asignada
            {}
            ORDER BY a.apellidos, a.nombre",
            Self::ALUMNO_JOINS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_alumnos")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AlumnoResumen {
                    id_alumno: row.get(0)?,
                    nif_nie: row.get(1)?,
                    nombre: row.get(2)?,
                    apellidos: row.get(3)?,
                    fecha_nacimiento: row.get(4)?,
                    curso: row.get(5)?,
                    telefono: row.get(6)?,
                    direccion: row.get(7)?,
                    cp: row.get(8)?,
                    localidad: row.get(9)?,
                    observaciones: row.get(10)?,
                    entidad_centro: row.get(11)?,
                    ciclo: row.get(12)?,
                    provincia: row.get(13)?,
                    vacante_asignada: row.get(14)?,
                })
            })
            .context("Failed to query alumnos")?;
        let mut alumnos = Vec::new();
        for row in rows {
            alumnos.push(row.context("Failed to read alumno row")?);
        }
        Ok(alumnos)
    }

    pub fn get_alumno(&self, id_alumno: i64) -> Result<AlumnoDetalle, SgeError> {
        let sql = format!(
            "SELECT
                a.id_alumno, a.nif_nie, a.nombre, a.apellidos, a.fecha_nacimiento,
                a.id_entidad_centro, a.id_ciclo, a.curso, a.telefono,
                a.direccion, a.cp, a.localidad, a.id_provincia, a.observaciones,
                e.entidad AS entidad_centro,
                c.ciclo AS ciclo,
                p.provincia AS provincia,
                ev.entidad AS vacante_asignada
            {}
            WHERE a.id_alumno = ?1
            LIMIT 1",
            Self::ALUMNO_JOINS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare get_alumno")?;
        let mut rows = stmt
            .query_map(params![id_alumno], |row| {
                Ok(AlumnoDetalle {
                    id_alumno: row.get(0)?,
                    nif_nie: row.get(1)?,
                    nombre: row.get(2)?,
                    apellidos: row.get(3)?,
                    fecha_nacimiento: row.get(4)?,
                    id_entidad_centro: row.get(5)?,
                    id_ciclo: row.get(6)?,
                    curso: row.get(7)?,
                    telefono: row.get(8)?,
                    direccion: row.get(9)?,
                    cp: row.get(10)?,
                    localidad: row.get(11)?,
                    id_provincia: row.get(12)?,
                    observaciones: row.get(13)?,
                    entidad_centro: row.get(14)?,
                    ciclo: row.get(15)?,
                    provincia: row.get(16)?,
                    vacante_asignada: row.get(17)?,
                })
            })
            .context("Failed to query alumno")?;
        match rows.next() {
            Some(row) => Ok(row.context("Failed to read alumno row")?),
            None => Err(SgeError::NotFound("Alumno no encontrado".into())),
        }
    }

    /// The chosen center entity must exist and carry the `CENTRO EDUCATIVO`
    /// type (case-insensitive). A missing catalog entry means the reference
    /// data was never loaded.
    fn validar_centro_educativo(&self, id_entidad: i64) -> Result<(), SgeError> {
        let id_tipo_centro: Option<i64> = self
            .conn
            .query_row(
                "SELECT id_tipo_entidad FROM sgi_tipos_entidad
                 WHERE UPPER(tipo_entidad) = 'CENTRO EDUCATIVO' LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query tipo CENTRO EDUCATIVO")?;

        let Some(id_tipo_centro) = id_tipo_centro else {
            return Err(SgeError::Validation(
                "No existe el tipo 'CENTRO EDUCATIVO' en sgi_tipos_entidad".into(),
            ));
        };

        let entidad_tipo: Option<i64> = self
            .conn
            .query_row(
                "SELECT id_tipo_entidad FROM sgi_entidades WHERE id_entidad = ?1 LIMIT 1",
                params![id_entidad],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query entidad type")?;

        match entidad_tipo {
            None => Err(SgeError::Validation("La entidad centro no existe".into())),
            Some(tipo) if tipo != id_tipo_centro => Err(SgeError::Validation(
                "La entidad seleccionada no es un CENTRO EDUCATIVO".into(),
            )),
            Some(_) => Ok(()),
        }
    }

    pub fn create_alumno(&self, p: &AlumnoPayload) -> Result<(), SgeError> {
        self.validar_centro_educativo(p.id_entidad_centro)?;

        self.conn
            .execute(
                "INSERT INTO sgi_alumnos (
                    nif_nie, nombre, apellidos, fecha_nacimiento,
                    id_entidad_centro, id_ciclo, curso, telefono,
                    direccion, cp, localidad, id_provincia, observaciones
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    p.nif_nie,
                    p.nombre,
                    p.apellidos,
                    p.fecha_nacimiento,
                    p.id_entidad_centro,
                    p.id_ciclo,
                    p.curso,
                    p.telefono,
                    p.direccion,
                    p.cp,
                    p.localidad,
                    p.id_provincia,
                    p.observaciones
                ],
            )
            .map_err(|e| {
                constraint_conflict(e, "No se pudo crear (NIF/NIE duplicado u otra restricción)")
            })?;
        Ok(())
    }

    pub fn update_alumno(&self, id_alumno: i64, p: &AlumnoPayload) -> Result<(), SgeError> {
        self.alumno_exists(id_alumno)?;
        self.validar_centro_educativo(p.id_entidad_centro)?;

        self.conn
            .execute(
                "UPDATE sgi_alumnos SET
                    nif_nie = ?1, nombre = ?2, apellidos = ?3, fecha_nacimiento = ?4,
                    id_entidad_centro = ?5, id_ciclo = ?6, curso = ?7, telefono = ?8,
                    direccion = ?9, cp = ?10, localidad = ?11, id_provincia = ?12,
                    observaciones = ?13
                 WHERE id_alumno = ?14",
                params![
                    p.nif_nie,
                    p.nombre,
                    p.apellidos,
                    p.fecha_nacimiento,
                    p.id_entidad_centro,
                    p.id_ciclo,
                    p.curso,
                    p.telefono,
                    p.direccion,
                    p.cp,
                    p.localidad,
                    p.id_provincia,
                    p.observaciones,
                    id_alumno
                ],
            )
            .map_err(|e| {
                constraint_conflict(
                    e,
                    "No se pudo actualizar (NIF/NIE duplicado u otra restricción)",
                )
            })?;
        Ok(())
    }

    pub fn delete_alumno(&self, id_alumno: i64) -> Result<(), SgeError> {
        self.alumno_exists(id_alumno)?;

        let asignado: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sgi_vacantes_x_alumnos WHERE id_alumno = ?1",
                params![id_alumno],
                |row| row.get(0),
            )
            .context("Failed to count assignments for alumno")?;
        if asignado > 0 {
            return Err(SgeError::Conflict(
                "No se puede borrar: el alumno está asignado a una vacante. Desasígnalo primero."
                    .into(),
            ));
        }

        self.conn
            .execute(
                "DELETE FROM sgi_alumnos WHERE id_alumno = ?1",
                params![id_alumno],
            )
            .context("Failed to delete alumno")?;
        Ok(())
    }

    fn alumno_exists(&self, id_alumno: i64) -> Result<(), SgeError> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT id_alumno FROM sgi_alumnos WHERE id_alumno = ?1 LIMIT 1",
                params![id_alumno],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to check alumno existence")?;
        match found {
            Some(_) => Ok(()),
            None => Err(SgeError::NotFound("Alumno no encontrado".into())),
        }
    }

    // ── Vacantes ──────────────────────────────────────────────────────

    pub fn list_vacantes(&self) -> Result<Vec<VacanteResumen>, SgeError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT
                    v.id_vacante, v.curso, v.num_vacantes, v.observaciones,
                    e.entidad AS entidad,
                    c.ciclo AS ciclo,
                    COUNT(vxa.id_alumno) AS num_alumnos
                 FROM sgi_vacantes v
                 JOIN sgi_entidades e ON e.id_entidad = v.id_entidad
                 JOIN sgi_ciclos c ON c.id_ciclo = v.id_ciclo
                 LEFT JOIN sgi_vacantes_x_alumnos vxa ON vxa.id_vacante = v.id_vacante
                 GROUP BY v.id_vacante, v.curso, v.num_vacantes, v.observaciones, e.entidad, c.ciclo
                 ORDER BY e.entidad, c.ciclo, v.curso",
            )
            .context("Failed to prepare list_vacantes")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(VacanteResumen {
                    id_vacante: row.get(0)?,
                    curso: row.get(1)?,
                    num_vacantes: row.get(2)?,
                    observaciones: row.get(3)?,
                    entidad: row.get(4)?,
                    ciclo: row.get(5)?,
                    num_alumnos: row.get(6)?,
                    listado_alumnos: String::new(),
                })
            })
            .context("Failed to query vacantes")?;
        let mut vacantes = Vec::new();
        for row in rows {
            vacantes.push(row.context("Failed to read vacante row")?);
        }

        // Surname-ordered roll per vacancy, assembled here so the ordering
        // guarantee does not depend on GROUP_CONCAT behavior. A vacancy with
        // no students keeps the explicit empty string.
        let mut stmt = self
            .conn
            .prepare(
                "SELECT vxa.id_vacante, a.nombre || ' ' || a.apellidos
                 FROM sgi_vacantes_x_alumnos vxa
                 JOIN sgi_alumnos a ON a.id_alumno = vxa.id_alumno
                 ORDER BY a.apellidos, a.nombre",
            )
            .context("Failed to prepare vacante roll query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .context("Failed to query vacante roll")?;
        let mut roll: std::collections::HashMap<i64, Vec<String>> =
            std::collections::HashMap::new();
        for row in rows {
            let (id_vacante, nombre) = row.context("Failed to read roll row")?;
            roll.entry(id_vacante).or_default().push(nombre);
        }
        for vacante in &mut vacantes {
            if let Some(nombres) = roll.get(&vacante.id_vacante) {
                vacante.listado_alumnos = nombres.join(", ");
            }
        }
        Ok(vacantes)
    }

    pub fn create_vacante(&self, p: &VacantePayload) -> Result<(), SgeError> {
        self.conn
            .execute(
                "INSERT INTO sgi_vacantes (id_entidad, id_ciclo, curso, num_vacantes, observaciones)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![p.id_entidad, p.id_ciclo, p.curso, p.num_vacantes, p.observaciones],
            )
            .map_err(|e| {
                constraint_conflict(
                    e,
                    "No se pudo crear: ya existe una vacante para esa entidad, ciclo y curso (UNIQUE).",
                )
            })?;
        Ok(())
    }

    pub fn update_vacante(&self, id_vacante: i64, p: &VacantePayload) -> Result<(), SgeError> {
        self.vacante_exists(id_vacante)?;

        let ocupadas = self.count_asignados(id_vacante)?;
        if p.num_vacantes < ocupadas {
            return Err(SgeError::Validation(format!(
                "No se puede poner num_vacantes={} porque ya hay {} alumnos asignados",
                p.num_vacantes, ocupadas
            )));
        }

        self.conn
            .execute(
                "UPDATE sgi_vacantes SET
                    id_entidad = ?1, id_ciclo = ?2, curso = ?3,
                    num_vacantes = ?4, observaciones = ?5
                 WHERE id_vacante = ?6",
                params![
                    p.id_entidad,
                    p.id_ciclo,
                    p.curso,
                    p.num_vacantes,
                    p.observaciones,
                    id_vacante
                ],
            )
            .map_err(|e| {
                constraint_conflict(
                    e,
                    "No se pudo actualizar: ya existe otra vacante con esa entidad, ciclo y curso (UNIQUE).",
                )
            })?;
        Ok(())
    }

    pub fn delete_vacante(&self, id_vacante: i64) -> Result<(), SgeError> {
        self.vacante_exists(id_vacante)?;

        if self.count_asignados(id_vacante)? > 0 {
            return Err(SgeError::Conflict(
                "No se puede borrar la vacante porque tiene alumnos asignados. Desasígnalos primero."
                    .into(),
            ));
        }

        self.conn
            .execute(
                "DELETE FROM sgi_vacantes WHERE id_vacante = ?1",
                params![id_vacante],
            )
            .context("Failed to delete vacante")?;
        Ok(())
    }

    /// Students sharing the vacancy's cycle and course with no assignment
    /// row anywhere, i.e. the candidates eligible for this vacancy.
    pub fn alumnos_disponibles(&self, id_vacante: i64) -> Result<Vec<CandidatoAlumno>, SgeError> {
        let (id_ciclo, curso) = self.vacante_ciclo_curso(id_vacante)?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT a.id_alumno, a.nombre, a.apellidos, a.nif_nie
                 FROM sgi_alumnos a
                 LEFT JOIN sgi_vacantes_x_alumnos vxa ON vxa.id_alumno = a.id_alumno
                 WHERE a.id_ciclo = ?1 AND a.curso = ?2 AND vxa.id_alumno IS NULL
                 ORDER BY a.apellidos, a.nombre",
            )
            .context("Failed to prepare alumnos_disponibles")?;
        let rows = stmt
            .query_map(params![id_ciclo, curso], |row| {
                Ok(CandidatoAlumno {
                    id_alumno: row.get(0)?,
                    nombre: row.get(1)?,
                    apellidos: row.get(2)?,
                    nif_nie: row.get(3)?,
                })
            })
            .context("Failed to query alumnos_disponibles")?;
        let mut candidatos = Vec::new();
        for row in rows {
            candidatos.push(row.context("Failed to read candidato row")?);
        }
        Ok(candidatos)
    }

    fn vacante_exists(&self, id_vacante: i64) -> Result<(), SgeError> {
        self.vacante_ciclo_curso(id_vacante).map(|_| ())
    }

    fn vacante_ciclo_curso(&self, id_vacante: i64) -> Result<(i64, i64), SgeError> {
        let found: Option<(i64, i64)> = self
            .conn
            .query_row(
                "SELECT id_ciclo, curso FROM sgi_vacantes WHERE id_vacante = ?1 LIMIT 1",
                params![id_vacante],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to check vacante existence")?;
        found.ok_or_else(|| SgeError::NotFound("Vacante no encontrada".into()))
    }

    fn count_asignados(&self, id_vacante: i64) -> Result<i64, SgeError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sgi_vacantes_x_alumnos WHERE id_vacante = ?1",
                params![id_vacante],
                |row| row.get(0),
            )
            .context("Failed to count asignados")?;
        Ok(count)
    }

    // ── Asignaciones ──────────────────────────────────────────────────

    /// Assign a student to a vacancy. The checks run in a fixed order so
    /// each failure carries its own reason: vacancy exists, student exists,
    /// cycle+course compatibility, student not already assigned anywhere,
    /// free capacity. The caller runs this whole method under one
    /// `DbHandle::call`, which makes the sequence atomic.
    pub fn assign_alumno(&self, id_vacante: i64, id_alumno: i64) -> Result<(), SgeError> {
        let vac: Option<(i64, i64, i64)> = self
            .conn
            .query_row(
                "SELECT id_ciclo, curso, num_vacantes FROM sgi_vacantes
                 WHERE id_vacante = ?1 LIMIT 1",
                params![id_vacante],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .context("Failed to query vacante for assignment")?;
        let Some((vac_ciclo, vac_curso, num_vacantes)) = vac else {
            return Err(SgeError::NotFound("Vacante no encontrada".into()));
        };

        let alum: Option<(i64, i64)> = self
            .conn
            .query_row(
                "SELECT id_ciclo, curso FROM sgi_alumnos WHERE id_alumno = ?1 LIMIT 1",
                params![id_alumno],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to query alumno for assignment")?;
        let Some((alum_ciclo, alum_curso)) = alum else {
            return Err(SgeError::NotFound("Alumno no encontrado".into()));
        };

        if alum_ciclo != vac_ciclo || alum_curso != vac_curso {
            return Err(SgeError::Validation(
                "El alumno no coincide en ciclo y/o curso con la vacante".into(),
            ));
        }

        let ya_asignado: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sgi_vacantes_x_alumnos WHERE id_alumno = ?1",
                params![id_alumno],
                |row| row.get(0),
            )
            .context("Failed to check existing assignment")?;
        if ya_asignado > 0 {
            return Err(SgeError::Conflict(
                "El alumno ya está asignado a una vacante".into(),
            ));
        }

        if self.count_asignados(id_vacante)? >= num_vacantes {
            return Err(SgeError::Conflict(
                "No hay plazas disponibles en esta vacante".into(),
            ));
        }

        self.conn
            .execute(
                "INSERT INTO sgi_vacantes_x_alumnos (id_vacante, id_alumno) VALUES (?1, ?2)",
                params![id_vacante, id_alumno],
            )
            .map_err(|e| constraint_conflict(e, "El alumno ya está asignado a una vacante"))?;
        Ok(())
    }

    pub fn unassign_alumno(&self, id_vacante: i64, id_alumno: i64) -> Result<(), SgeError> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM sgi_vacantes_x_alumnos WHERE id_vacante = ?1 AND id_alumno = ?2",
                params![id_vacante, id_alumno],
            )
            .context("Failed to delete assignment")?;
        if deleted == 0 {
            return Err(SgeError::NotFound(
                "El alumno no está asignado a esta vacante".into(),
            ));
        }
        Ok(())
    }

    // ── Seed ──────────────────────────────────────────────────────────

    /// Load the reference catalogs a fresh database needs (entity types,
    /// cycles, provinces, demo entities) plus a demo user with a pre-issued
    /// session token. Idempotent. Returns the demo token.
    pub fn seed_demo_data(&self) -> Result<String, SgeError> {
        self.conn
            .execute_batch(
                "
                INSERT OR IGNORE INTO sgi_tipos_entidad (tipo_entidad) VALUES
                    ('CENTRO EDUCATIVO'), ('EMPRESA'), ('ORGANISMO PUBLICO');

                INSERT OR IGNORE INTO sgi_ciclos (ciclo) VALUES
                    ('Desarrollo de Aplicaciones Multiplataforma'),
                    ('Desarrollo de Aplicaciones Web'),
                    ('Administración de Sistemas Informáticos en Red');

                INSERT OR IGNORE INTO sgi_provincias (provincia) VALUES
                    ('Alicante'), ('Castellón'), ('Valencia');

                INSERT OR IGNORE INTO sgi_usuarios (usuario, id_rol, token_sesion) VALUES
                    ('admin', 1, 'demo-token-sge');
                ",
            )
            .context("Failed to seed reference data")?;

        // Entities have no natural UNIQUE key, so guard by name manually.
        let have_entidades: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sgi_entidades", [], |row| row.get(0))
            .context("Failed to count entidades")?;
        if have_entidades == 0 {
            self.conn
                .execute_batch(
                    "
                    INSERT INTO sgi_entidades (entidad, id_tipo_entidad)
                    SELECT 'IES La Marina', id_tipo_entidad FROM sgi_tipos_entidad
                        WHERE tipo_entidad = 'CENTRO EDUCATIVO';
                    INSERT INTO sgi_entidades (entidad, id_tipo_entidad)
                    SELECT 'Desarrollos Levante SL', id_tipo_entidad FROM sgi_tipos_entidad
                        WHERE tipo_entidad = 'EMPRESA';
                    INSERT INTO sgi_entidades (entidad, id_tipo_entidad)
                    SELECT 'Informática Turia SA', id_tipo_entidad FROM sgi_tipos_entidad
                        WHERE tipo_entidad = 'EMPRESA';
                    ",
                )
                .context("Failed to seed entidades")?;
        }

        Ok("demo-token-sge".to_string())
    }
}

/// Integrity violations become `Conflict` with the given user-facing
/// message; any other SQLite error is an internal database error.
fn constraint_conflict(err: rusqlite::Error, message: &str) -> SgeError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            SgeError::Conflict(message.to_string())
        }
        _ => SgeError::Database(anyhow::Error::new(err).context("Write failed")),
    }
}
