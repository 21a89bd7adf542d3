pub const INSERT_EMERGENCY_REQUEST: &str = r#"
INSERT INTO emergency_requests (
    id, patient_id, latitude, longitude, address, symptoms, notes, status,
    hospital_id, ambulance_id, estimated_arrival_time, created_by, created_at, updated_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
RETURNING *;
"#;

pub const SELECT_EMERGENCY_REQUEST: &str = r#"
SELECT * FROM emergency_requests WHERE id = $1;
"#;

// Conditional on the status the caller validated against; zero rows means the
// record is missing or someone else moved it first.
pub const UPDATE_EMERGENCY_STATUS: &str = r#"
UPDATE emergency_requests
SET status = $2,
    ambulance_id = COALESCE($3, ambulance_id),
    updated_at = $4
WHERE id = $1 AND status = $5
RETURNING *;
"#;

pub const SELECT_EMERGENCY_STATUS: &str = r#"
SELECT status FROM emergency_requests WHERE id = $1;
"#;

pub const SELECT_PATIENT: &str = r#"
SELECT user_id, blood_group, allergies FROM patients WHERE user_id = $1;
"#;

pub const SELECT_EMERGENCY_HOSPITALS: &str = r#"
SELECT h.user_id,
       COALESCE(h.name, 'Unknown Hospital') AS name,
       h.latitude,
       h.longitude
FROM hospitals h
WHERE h.emergency_services
  AND h.latitude IS NOT NULL
  AND h.longitude IS NOT NULL
ORDER BY h.created_at, h.user_id;
"#;

pub const SELECT_PATIENT_CONTACT: &str = r#"
SELECT u.id, u.phone FROM users u WHERE u.id = $1;
"#;

pub const SELECT_HOSPITAL_CONTACT: &str = r#"
SELECT u.id, COALESCE(h.emergency_phone, u.phone) AS phone
FROM hospitals h
JOIN users u ON u.id = h.user_id
WHERE h.user_id = $1;
"#;
