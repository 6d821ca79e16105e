//! Tangent-plane (TAN) world coordinate system for image HDUs.
//!
//! Pixel coordinates are 0-indexed throughout; the FITS 1-indexed CRPIX is
//! converted on load.

use crate::fits::Header;

#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    pub crpix1: f64,
    pub crpix2: f64,
    /// RA at the reference pixel (degrees)
    pub crval1: f64,
    /// Dec at the reference pixel (degrees)
    pub crval2: f64,
    pub cd1_1: f64,
    pub cd1_2: f64,
    pub cd2_1: f64,
    pub cd2_2: f64,
}

impl Wcs {
    /// Build from header keywords. Accepts a CD matrix, or CDELT with an
    /// optional CROTA2 rotation. Returns `None` when a required keyword is
    /// missing, the projection is not TAN, or the matrix is singular.
    pub fn from_header(header: &Header) -> Option<Self> {
        if let Some(ctype) = header.get("CTYPE1") {
            if !ctype.to_uppercase().contains("TAN") {
                return None;
            }
        }

        let crpix1 = header.get_f64("CRPIX1")? - 1.0;
        let crpix2 = header.get_f64("CRPIX2")? - 1.0;
        let crval1 = header.get_f64("CRVAL1")?;
        let crval2 = header.get_f64("CRVAL2")?;

        let (cd1_1, cd1_2, cd2_1, cd2_2) = if let (Some(a), Some(b), Some(c), Some(d)) = (
            header.get_f64("CD1_1"),
            header.get_f64("CD1_2"),
            header.get_f64("CD2_1"),
            header.get_f64("CD2_2"),
        ) {
            (a, b, c, d)
        } else if let Some(scale) = pc_matrix(header) {
            scale
        } else {
            let cdelt1 = header.get_f64("CDELT1")?;
            let cdelt2 = header.get_f64("CDELT2")?;
            let rot = header.get_f64("CROTA2").unwrap_or(0.0).to_radians();
            let (sin_r, cos_r) = rot.sin_cos();
            (
                cdelt1 * cos_r,
                -cdelt2 * sin_r,
                cdelt1 * sin_r,
                cdelt2 * cos_r,
            )
        };

        let wcs = Self {
            crpix1,
            crpix2,
            crval1,
            crval2,
            cd1_1,
            cd1_2,
            cd2_1,
            cd2_2,
        };
        (wcs.determinant().abs() > 1e-20).then_some(wcs)
    }

    fn determinant(&self) -> f64 {
        self.cd1_1 * self.cd2_2 - self.cd1_2 * self.cd2_1
    }

    /// Pixel (x, y) to (RA, Dec) in degrees
    pub fn pixel_to_sky(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.crpix1;
        let dy = y - self.crpix2;

        let xi = (self.cd1_1 * dx + self.cd1_2 * dy).to_radians();
        let eta = (self.cd2_1 * dx + self.cd2_2 * dy).to_radians();
        let ra0 = self.crval1.to_radians();
        let dec0 = self.crval2.to_radians();

        let rho = (xi * xi + eta * eta).sqrt();
        let (ra, dec) = if rho < 1e-12 {
            (self.crval1, self.crval2)
        } else {
            let c = rho.atan();
            let (sin_c, cos_c) = c.sin_cos();
            let dec = (cos_c * dec0.sin() + eta * sin_c * dec0.cos() / rho).asin();
            let ra = ra0
                + (xi * sin_c).atan2(rho * dec0.cos() * cos_c - eta * dec0.sin() * sin_c);
            (ra.to_degrees(), dec.to_degrees())
        };

        (ra.rem_euclid(360.0), dec)
    }

    /// (RA, Dec) in degrees to pixel (x, y). `None` for points on the far
    /// hemisphere, which the tangent projection cannot represent.
    pub fn sky_to_pixel(&self, ra: f64, dec: f64) -> Option<(f64, f64)> {
        let ra = ra.to_radians();
        let dec = dec.to_radians();
        let ra0 = self.crval1.to_radians();
        let dec0 = self.crval2.to_radians();

        let (sin_dec, cos_dec) = dec.sin_cos();
        let (sin_dec0, cos_dec0) = dec0.sin_cos();
        let (sin_dra, cos_dra) = (ra - ra0).sin_cos();

        let denom = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;
        if denom <= 0.0 {
            return None;
        }

        let xi = (cos_dec * sin_dra / denom).to_degrees();
        let eta = ((sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / denom).to_degrees();

        let det = self.determinant();
        let dx = (self.cd2_2 * xi - self.cd1_2 * eta) / det;
        let dy = (-self.cd2_1 * xi + self.cd1_1 * eta) / det;
        Some((self.crpix1 + dx, self.crpix2 + dy))
    }

    /// Mean pixel scale in arcseconds
    pub fn pixel_scale_arcsec(&self) -> f64 {
        let sx = (self.cd1_1 * self.cd1_1 + self.cd2_1 * self.cd2_1).sqrt();
        let sy = (self.cd1_2 * self.cd1_2 + self.cd2_2 * self.cd2_2).sqrt();
        (sx + sy) / 2.0 * 3600.0
    }
}

/// PC matrix scaled by CDELT, as written by the JWST pipeline
fn pc_matrix(header: &Header) -> Option<(f64, f64, f64, f64)> {
    let pc1_1 = header.get_f64("PC1_1")?;
    let pc2_2 = header.get_f64("PC2_2")?;
    let pc1_2 = header.get_f64("PC1_2").unwrap_or(0.0);
    let pc2_1 = header.get_f64("PC2_1").unwrap_or(0.0);
    let cdelt1 = header.get_f64("CDELT1")?;
    let cdelt2 = header.get_f64("CDELT2")?;
    Some((
        cdelt1 * pc1_1,
        cdelt1 * pc1_2,
        cdelt2 * pc2_1,
        cdelt2 * pc2_2,
    ))
}

/// Great-circle separation between two sky positions, in degrees
pub fn angular_distance(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let (ra1, dec1, ra2, dec2) = (
        ra1.to_radians(),
        dec1.to_radians(),
        ra2.to_radians(),
        dec2.to_radians(),
    );
    // Haversine keeps precision at arcsecond separations
    let a = ((dec2 - dec1) / 2.0).sin().powi(2)
        + dec1.cos() * dec2.cos() * ((ra2 - ra1) / 2.0).sin().powi(2);
    (2.0 * a.sqrt().min(1.0).asin()).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fits::parse_fits_header;

    fn header(cards: &[&str]) -> Header {
        let text: String = cards.iter().map(|c| format!("{:<80}", c)).collect();
        parse_fits_header(text.as_bytes())
    }

    fn m82_wcs() -> Wcs {
        Wcs::from_header(&header(&[
            "CTYPE1  = 'RA---TAN'",
            "CTYPE2  = 'DEC--TAN'",
            "CRPIX1  =                512.0",
            "CRPIX2  =                512.0",
            "CRVAL1  =           148.968458",
            "CRVAL2  =            69.679694",
            "CDELT1  =              -0.0001",
            "CDELT2  =               0.0001",
        ]))
        .unwrap()
    }

    #[test]
    fn test_reference_pixel_maps_to_crval() {
        let wcs = m82_wcs();
        let (ra, dec) = wcs.pixel_to_sky(511.0, 511.0);
        assert!((ra - 148.968458).abs() < 1e-9);
        assert!((dec - 69.679694).abs() < 1e-9);
        assert!((wcs.pixel_scale_arcsec() - 0.36).abs() < 1e-9);
    }

    #[test]
    fn test_pixel_sky_pixel_roundtrip() {
        let wcs = m82_wcs();
        for &(x, y) in &[(0.0, 0.0), (100.5, 900.25), (1023.0, 10.0)] {
            let (ra, dec) = wcs.pixel_to_sky(x, y);
            let (bx, by) = wcs.sky_to_pixel(ra, dec).unwrap();
            assert!((bx - x).abs() < 1e-6, "x {} -> {}", x, bx);
            assert!((by - y).abs() < 1e-6, "y {} -> {}", y, by);
        }
    }

    #[test]
    fn test_ra_increases_to_the_left() {
        let wcs = m82_wcs();
        let (ra_left, _) = wcs.pixel_to_sky(400.0, 511.0);
        let (ra_right, _) = wcs.pixel_to_sky(600.0, 511.0);
        assert!(ra_left > ra_right);
    }

    #[test]
    fn test_far_side_is_unprojectable() {
        let wcs = m82_wcs();
        assert!(wcs.sky_to_pixel(148.968458 + 180.0, -69.679694).is_none());
    }

    #[test]
    fn test_cd_matrix_and_missing_keywords() {
        let wcs = Wcs::from_header(&header(&[
            "CRPIX1  =                  1.0",
            "CRPIX2  =                  1.0",
            "CRVAL1  =                 10.0",
            "CRVAL2  =                  0.0",
            "CD1_1   =          -0.00001111",
            "CD1_2   =                  0.0",
            "CD2_1   =                  0.0",
            "CD2_2   =           0.00001111",
        ]))
        .unwrap();
        assert_eq!(wcs.crpix1, 0.0);

        assert!(Wcs::from_header(&header(&["CRPIX1  =                  1.0"])).is_none());
        assert!(Wcs::from_header(&header(&[
            "CTYPE1  = 'RA---SIP'",
            "CRPIX1  =                  1.0",
            "CRPIX2  =                  1.0",
            "CRVAL1  =                 10.0",
            "CRVAL2  =                  0.0",
            "CDELT1  =              -0.0001",
            "CDELT2  =               0.0001",
        ]))
        .is_none());
    }

    #[test]
    fn test_angular_distance() {
        let d = angular_distance(10.0, 0.0, 10.0, 1.0 / 3600.0);
        assert!((d * 3600.0 - 1.0).abs() < 1e-6);
        assert!((angular_distance(0.0, 89.0, 180.0, 89.0) - 2.0).abs() < 1e-9);
        assert_eq!(angular_distance(5.0, 5.0, 5.0, 5.0), 0.0);
    }
}
