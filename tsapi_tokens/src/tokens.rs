use tsapi_clock::{Clock, DurationSecs, System, UnixTime};

use super::{AccessToken, AccessTokenRef};

/// The token type expected from the API's token endpoints
pub const BEARER: &str = "Bearer";

/// An access token as returned by the authority with some additional lifetime information
#[derive(Clone, Debug)]
pub struct TokenWithLifetime {
    access_token: AccessToken,
    token_type: String,
    scope: Option<String>,
    lifetime: DurationSecs,
    issued: UnixTime,
    expiry: UnixTime,
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token can be attached to outbound requests
    Fresh,
    /// The token is within its safety margin or past its declared lifetime
    Expired,
}

impl TokenWithLifetime {
    /// Gets the current access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the token type declared by the authority
    #[inline]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// Gets the scope granted by the authority, if declared
    #[inline]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Gets the token's lifetime as declared by the authority
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.lifetime
    }

    /// Gets the time that the token was issued
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time after which the token will no longer be used
    ///
    /// This is earlier than the authority's declared expiry by the safety margin.
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Gets the interval during which the token will be used
    #[inline]
    pub fn valid_interval(&self) -> std::ops::Range<UnixTime> {
        self.issued..self.expiry
    }

    /// Gets the token's current lifetime status
    #[inline]
    pub fn token_status(&self) -> TokenStatus {
        self.token_status_with_clock(&System)
    }

    /// Gets the token's lifetime status based on the current time
    /// as reported by the provided clock
    #[inline]
    pub fn token_status_with_clock<C: Clock>(&self, clock: &C) -> TokenStatus {
        self.token_status_at(clock.now())
    }

    /// Gets the token's lifetime status as of the provided time
    #[inline]
    pub fn token_status_at(&self, time: UnixTime) -> TokenStatus {
        if time < self.expiry {
            TokenStatus::Fresh
        } else {
            TokenStatus::Expired
        }
    }

    /// Gets a duration for how much longer the token would be used as of the
    /// provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expiry - time
    }
}

/// Configuration for determining how long an access token may be used
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig<C = System> {
    safety_margin: DurationSecs,
    clock: C,
}

impl Default for TokenLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// Uses a safety margin of five minutes and the system clock.
    fn default() -> Self {
        Self {
            safety_margin: TokenLifetimeConfig::DEFAULT_SAFETY_MARGIN,
            clock: System,
        }
    }
}

impl TokenLifetimeConfig {
    /// The default margin subtracted from a token's declared lifetime
    pub const DEFAULT_SAFETY_MARGIN: DurationSecs = DurationSecs(5 * 60);

    /// Constructs a new lifetime configuration
    ///
    /// A token using this configuration stops being used `safety_margin` before
    /// the end of the lifetime declared by the authority. A token whose declared
    /// lifetime is shorter than the margin is considered expired as soon as it
    /// is issued.
    pub fn new(safety_margin: DurationSecs) -> Self {
        Self {
            safety_margin,
            clock: System,
        }
    }
}

impl<C> TokenLifetimeConfig<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenLifetimeConfig<D> {
        TokenLifetimeConfig {
            safety_margin: self.safety_margin,
            clock,
        }
    }

    /// The margin subtracted from each token's declared lifetime
    #[inline]
    pub fn safety_margin(&self) -> DurationSecs {
        self.safety_margin
    }

    /// The clock used to stamp and evaluate tokens
    #[inline]
    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<C: Clock> TokenLifetimeConfig<C> {
    /// Given an access token and its declared lifetime, constructs a token with a lifetime
    pub fn create_token<A>(
        &self,
        access_token: A,
        token_type: impl Into<String>,
        scope: Option<String>,
        valid_duration: DurationSecs,
    ) -> TokenWithLifetime
    where
        A: AsRef<AccessTokenRef>,
    {
        let issued = self.clock.now();
        TokenWithLifetime {
            access_token: access_token.as_ref().to_owned(),
            token_type: token_type.into(),
            scope,
            lifetime: valid_duration,
            issued,
            expiry: issued + valid_duration.saturating_sub(self.safety_margin),
        }
    }
}
