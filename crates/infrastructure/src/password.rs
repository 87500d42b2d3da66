use application::{password::PasswordHasherError, PasswordHasher};
use async_trait::async_trait;
use bcrypt::DEFAULT_COST;
use domain::PasswordHash;

const MIN_COST: u32 = 4;
const MAX_COST: u32 = 31;

/// bcrypt 哈希，计算放到阻塞线程池执行，避免占用 async worker。
#[derive(Clone)]
pub struct BcryptPasswordHasher {
    cost: u32,
}

impl BcryptPasswordHasher {
    pub fn new(cost: Option<u32>) -> Self {
        Self {
            cost: cost
                .unwrap_or(DEFAULT_COST)
                .clamp(MIN_COST, MAX_COST),
        }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl Default for BcryptPasswordHasher {
    fn default() -> Self {
        Self::new(None)
    }
}

async fn blocking<T, F>(job: F) -> Result<T, String>
where
    F: FnOnce() -> Result<T, bcrypt::BcryptError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|err| err.to_string())?
        .map_err(|err| err.to_string())
}

#[async_trait]
impl PasswordHasher for BcryptPasswordHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        let cost = self.cost;
        let plaintext = plaintext.to_owned();
        let hashed = blocking(move || bcrypt::hash(plaintext, cost))
            .await
            .map_err(PasswordHasherError::hash_error)?;

        PasswordHash::new(hashed).map_err(|err| PasswordHasherError::hash_error(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        let plaintext = plaintext.to_owned();
        let hashed = hashed.as_str().to_owned();
        blocking(move || bcrypt::verify(plaintext, &hashed))
            .await
            .map_err(PasswordHasherError::verify_error)
    }
}
