//! [`TokenModule`] over a PKCS#11 shared library via `cryptoki`

use std::fmt;
use std::rc::{Rc, Weak};

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::types::AuthPin;

use super::{TokenKey, TokenMechanism, TokenModule};
use crate::certificate::PublicKey;
use crate::config::Pkcs11Config;
use crate::error::{Error, Result};

fn token_error(context: &str, e: cryptoki::error::Error) -> Error {
    Error::Token(format!("{}: {}", context, e))
}

/// A loaded module with one read-only session on the configured slot
pub struct CryptokiModule {
    // session is ended before the library is finalized
    session: Option<Rc<Session>>,
    context: Option<Pkcs11>,
    logged_in: bool,
}

impl CryptokiModule {
    /// Load and initialize the module, then open a session on `config.slot`
    ///
    /// Logs in as the user when a PIN is configured.
    pub fn open(config: &Pkcs11Config) -> Result<Self> {
        log::debug!(
            "Loading PKCS#11 module {} (slot {})",
            config.module_path.display(),
            config.slot
        );
        let context =
            Pkcs11::new(&config.module_path).map_err(|e| token_error("load module", e))?;
        context
            .initialize(CInitializeArgs::OsThreads)
            .map_err(|e| token_error("initialize module", e))?;

        let slot = context
            .get_slots_with_token()
            .map_err(|e| token_error("list slots", e))?
            .into_iter()
            .find(|slot| slot.id() == config.slot)
            .ok_or_else(|| Error::Token(format!("no token in slot {}", config.slot)))?;

        let session = context
            .open_ro_session(slot)
            .map_err(|e| token_error("open session", e))?;

        let logged_in = match &config.pin {
            Some(pin) => {
                session
                    .login(UserType::User, Some(&AuthPin::new(pin.clone())))
                    .map_err(|e| token_error("login", e))?;
                true
            }
            None => false,
        };

        Ok(Self {
            session: Some(Rc::new(session)),
            context: Some(context),
            logged_in,
        })
    }

    fn session(&self) -> Result<&Rc<Session>> {
        self.session
            .as_ref()
            .ok_or(Error::InvalidState("token session closed"))
    }

    fn find_one(&self, template: &[Attribute]) -> Result<Option<ObjectHandle>> {
        let objects = self
            .session()?
            .find_objects(template)
            .map_err(|e| token_error("find objects", e))?;
        if objects.len() > 1 {
            log::warn!("{} token objects match, using the first", objects.len());
        }
        Ok(objects.into_iter().next())
    }
}

impl TokenModule for CryptokiModule {
    fn find_certificate(&mut self, serial_der: &[u8]) -> Result<Option<Vec<u8>>> {
        let template = [
            Attribute::Class(ObjectClass::CERTIFICATE),
            Attribute::SerialNumber(serial_der.to_vec()),
        ];
        let Some(handle) = self.find_one(&template)? else {
            return Ok(None);
        };

        let attributes = self
            .session()?
            .get_attributes(handle, &[AttributeType::Value])
            .map_err(|e| token_error("read certificate", e))?;
        let der = attributes.into_iter().find_map(|attribute| match attribute {
            Attribute::Value(value) => Some(value),
            _ => None,
        });
        der.map(Some)
            .ok_or_else(|| Error::Token("certificate object has no value".to_string()))
    }

    fn find_key_pair(
        &mut self,
        key_id: &[u8],
        public_key: &PublicKey,
    ) -> Result<Option<Box<dyn TokenKey>>> {
        let template = [
            Attribute::Class(ObjectClass::PRIVATE_KEY),
            Attribute::Id(key_id.to_vec()),
        ];
        let Some(handle) = self.find_one(&template)? else {
            return Ok(None);
        };
        log::debug!("Found {} token key", public_key.algorithm_name());

        Ok(Some(Box::new(CryptokiKey {
            session: Rc::downgrade(self.session()?),
            handle,
        })))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            if self.logged_in {
                if let Err(e) = session.logout() {
                    log::warn!("Failed to log out of token: {}", e);
                }
            }
        }
        // dropping the last context reference finalizes the library
        self.context = None;
        Ok(())
    }
}

impl fmt::Debug for CryptokiModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptokiModule")
            .field("open", &self.session.is_some())
            .field("logged_in", &self.logged_in)
            .finish()
    }
}

/// Private key object, usable while its session is open
struct CryptokiKey {
    session: Weak<Session>,
    handle: ObjectHandle,
}

impl TokenKey for CryptokiKey {
    fn sign(&self, mechanism: TokenMechanism, data: &[u8]) -> Result<Vec<u8>> {
        let session = self
            .session
            .upgrade()
            .ok_or(Error::InvalidState("token session closed"))?;
        let mechanism = match mechanism {
            TokenMechanism::RsaPkcs => Mechanism::RsaPkcs,
            TokenMechanism::Ecdsa => Mechanism::Ecdsa,
        };
        session
            .sign(&mechanism, self.handle, data)
            .map_err(|e| token_error("sign", e))
    }
}

#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
