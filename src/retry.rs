//! Política de reintentos con backoff exponencial acotado.
//!
//! Sólo se reintentan errores transitorios de proveedor/índice
//! (`RagError::is_transient`); los errores de validación fallan a la primera.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{RagError, Result};

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Intentos totales, incluido el primero.
    pub max_attempts: u32,
    /// Espera tras el primer fallo; se duplica en cada reintento.
    pub base_delay: Duration,
    /// Fracción aleatoria añadida a cada espera, en [0, 1].
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, jitter: f64) -> Result<Self> {
        if max_attempts == 0 {
            return Err(RagError::Config("max_attempts debe ser >= 1".into()));
        }
        if !(0.0..=1.0).contains(&jitter) {
            return Err(RagError::Config(format!("jitter ({jitter}) debe estar en [0, 1]")));
        }
        Ok(Self { max_attempts, base_delay, jitter })
    }

    /// Ejecuta `op` hasta que tenga éxito, devuelva un error no transitorio
    /// o se agoten los intentos.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let backoff = self.base_delay * 2u32.pow(attempt - 1);
                    let jitter = backoff.mul_f64(self.jitter * rand::rng().random::<f64>());
                    warn!(
                        "{label}: fallo transitorio en el intento {attempt}/{}: {err}. \
                         Reintentando en {:?}.",
                        self.max_attempts,
                        backoff + jitter
                    );
                    tokio::time::sleep(backoff + jitter).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(300), jitter: 0.2 }
    }
}
